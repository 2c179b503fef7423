use thiserror::Error;

#[derive(Debug, Error)]
pub enum CorrelateError {
    #[error(transparent)]
    Siem(#[from] vigil_siem::SiemError),
    #[error(transparent)]
    Domain(#[from] vigil_domain::DomainError),
}
