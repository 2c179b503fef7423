//! Smart query optimization (spec.md §4.8): before executing a search, the
//! engine estimates result size and, if it's over budget, applies field
//! projection, then aggregation conversion, then size reduction, then
//! falls back to streaming — in that order, stopping as soon as the
//! estimate fits.

#[derive(Debug, Clone, Copy)]
pub struct OptimizerConfig {
    /// Default 10 MiB (spec.md §4.8).
    pub byte_budget: u64,
    pub min_size: u32,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { byte_budget: 10 * 1024 * 1024, min_size: 10 }
    }
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub size: u32,
    pub average_doc_bytes: u64,
    /// Fields the caller explicitly asked for; `None` means "all fields".
    pub requested_fields: Option<Vec<String>>,
    /// A tool-declared priority field set used for projection when the
    /// caller didn't ask for specific fields.
    pub priority_fields: Vec<String>,
    /// Tool-declared estimate of how many fields a typical document has,
    /// used to compute the field-projection ratio.
    pub total_fields_estimate: u32,
    /// Whether this tool's semantics permit converting the query into an
    /// aggregation (spec.md §4.8 step 2, e.g. "top attackers" -> terms agg).
    pub aggregation_convertible: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationStep {
    FieldProjection,
    AggregationConversion,
    SizeReduction,
    StreamingFallback,
}

#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    pub steps_applied: Vec<OptimizationStep>,
    pub projected_fields: Option<Vec<String>>,
    pub use_aggregation: bool,
    pub final_size: u32,
    pub fallback_to_streaming: bool,
    pub estimated_bytes: u64,
}

fn estimate_bytes(size: u32, average_doc_bytes: u64, field_projection_ratio: f64) -> u64 {
    ((size as f64) * (average_doc_bytes as f64) * field_projection_ratio.clamp(0.0, 1.0)) as u64
}

/// Run the optimization ladder, applying steps until the estimate fits the
/// configured byte budget or every step has been tried.
pub fn optimize(request: &SearchRequest, config: &OptimizerConfig) -> OptimizationOutcome {
    let mut steps_applied = Vec::new();
    let mut projected_fields = request.requested_fields.clone();
    let mut ratio = projection_ratio(&projected_fields, request.total_fields_estimate);
    let mut size = request.size;
    let mut use_aggregation = false;

    let mut estimated = estimate_bytes(size, request.average_doc_bytes, ratio);
    if estimated <= config.byte_budget {
        return OptimizationOutcome {
            steps_applied,
            projected_fields,
            use_aggregation,
            final_size: size,
            fallback_to_streaming: false,
            estimated_bytes: estimated,
        };
    }

    // Step 1: field projection. A narrower-than-"all fields" set counts as
    // this step whether the caller supplied it directly or the optimizer
    // fell back to the tool's priority fields — either way the response is
    // projected, so both must be recorded (spec.md §4.8 scenario S1: a
    // caller-supplied `fields` still reports `"projection"` in
    // `optimization_applied` when the budget also requires a size cut).
    if projected_fields.is_none() && !request.priority_fields.is_empty() {
        projected_fields = Some(request.priority_fields.clone());
        ratio = projection_ratio(&projected_fields, request.total_fields_estimate);
    }
    if projected_fields.is_some() {
        steps_applied.push(OptimizationStep::FieldProjection);
        estimated = estimate_bytes(size, request.average_doc_bytes, ratio);
        if estimated <= config.byte_budget {
            return finish(steps_applied, projected_fields, use_aggregation, size, false, estimated);
        }
    }

    // Step 2: aggregation conversion.
    if request.aggregation_convertible {
        use_aggregation = true;
        steps_applied.push(OptimizationStep::AggregationConversion);
        // Aggregations return a handful of buckets regardless of `size`;
        // treat the estimate as satisfied once converted.
        return finish(steps_applied, projected_fields, use_aggregation, size, false, 0);
    }

    // Step 3: reduce size, halving until it fits or we hit the floor.
    if size > config.min_size {
        steps_applied.push(OptimizationStep::SizeReduction);
        while size > config.min_size {
            size = (size / 2).max(config.min_size);
            estimated = estimate_bytes(size, request.average_doc_bytes, ratio);
            if estimated <= config.byte_budget {
                return finish(steps_applied, projected_fields, use_aggregation, size, false, estimated);
            }
        }
    }

    // Step 4: fall back to streaming.
    steps_applied.push(OptimizationStep::StreamingFallback);
    finish(steps_applied, projected_fields, use_aggregation, size, true, estimated)
}

fn finish(
    steps_applied: Vec<OptimizationStep>,
    projected_fields: Option<Vec<String>>,
    use_aggregation: bool,
    final_size: u32,
    fallback_to_streaming: bool,
    estimated_bytes: u64,
) -> OptimizationOutcome {
    OptimizationOutcome { steps_applied, projected_fields, use_aggregation, final_size, fallback_to_streaming, estimated_bytes }
}

fn projection_ratio(fields: &Option<Vec<String>>, total_fields_estimate: u32) -> f64 {
    match fields {
        None => 1.0,
        Some(fields) if total_fields_estimate == 0 => {
            if fields.is_empty() {
                1.0
            } else {
                0.5
            }
        }
        Some(fields) => (fields.len() as f64 / total_fields_estimate as f64).clamp(0.01, 1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request() -> SearchRequest {
        SearchRequest {
            size: 1000,
            average_doc_bytes: 2048,
            requested_fields: None,
            priority_fields: vec!["source_ip".into(), "category".into()],
            total_fields_estimate: 20,
            aggregation_convertible: false,
        }
    }

    #[test]
    fn within_budget_applies_no_steps() {
        let request = SearchRequest { size: 10, ..base_request() };
        let outcome = optimize(&request, &OptimizerConfig::default());
        assert!(outcome.steps_applied.is_empty());
        assert_eq!(outcome.final_size, 10);
    }

    #[test]
    fn over_budget_applies_field_projection_first() {
        let request = base_request();
        let outcome = optimize(&request, &OptimizerConfig::default());
        assert_eq!(outcome.steps_applied.first(), Some(&OptimizationStep::FieldProjection));
        assert_eq!(outcome.projected_fields, Some(request.priority_fields));
    }

    #[test]
    fn caller_supplied_fields_still_record_projection_when_size_reduction_also_applies() {
        // spec.md scenario S1: caller passes `fields=[ts, source_ip]` and the
        // result still needs a size cut to fit the budget; both steps must
        // be reported, not just size reduction.
        let request = SearchRequest {
            size: 50_000,
            average_doc_bytes: 4_000,
            requested_fields: Some(vec!["ts".into(), "source_ip".into()]),
            ..base_request()
        };
        let outcome = optimize(&request, &OptimizerConfig::default());
        assert_eq!(
            outcome.steps_applied,
            vec![OptimizationStep::FieldProjection, OptimizationStep::SizeReduction]
        );
        assert_eq!(outcome.projected_fields, request.requested_fields);
        assert!(!outcome.fallback_to_streaming);
    }

    #[test]
    fn aggregation_convertible_query_converts_after_projection() {
        let request = SearchRequest { aggregation_convertible: true, ..base_request() };
        let outcome = optimize(&request, &OptimizerConfig::default());
        assert!(outcome.use_aggregation);
        assert!(outcome.steps_applied.contains(&OptimizationStep::AggregationConversion));
        assert!(!outcome.fallback_to_streaming);
    }

    #[test]
    fn huge_request_falls_back_to_streaming_as_last_resort() {
        let request = SearchRequest {
            size: 1_000_000,
            average_doc_bytes: 1_000_000,
            priority_fields: vec![],
            ..base_request()
        };
        let outcome = optimize(&request, &OptimizerConfig::default());
        assert!(outcome.fallback_to_streaming);
        assert_eq!(outcome.steps_applied.last(), Some(&OptimizationStep::StreamingFallback));
    }

    #[test]
    fn size_reduction_stops_once_estimate_fits() {
        let request = SearchRequest {
            size: 2000,
            average_doc_bytes: 6000,
            priority_fields: vec![],
            total_fields_estimate: 0,
            ..base_request()
        };
        let outcome = optimize(&request, &OptimizerConfig::default());
        assert!(outcome.steps_applied.contains(&OptimizationStep::SizeReduction));
        assert!(outcome.final_size < 2000);
        assert!(!outcome.fallback_to_streaming);
    }
}
