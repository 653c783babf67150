//! Default index declarations (§4.9, §9): plain data describing the
//! indexes a domain layer would normally register, filtered by its own
//! managed-tables list before being handed to the Index Manager. This
//! module imports nothing from a domain package, to avoid the layering
//! cycle §9 calls out.

use crate::index::CreateIndexOptions;

/// Composite indexes named explicitly by §4.9, plus the seven span indexes.
/// None of these carry `ASC`/`DESC`, a partial `WHERE`, or a `GIN` method.
pub fn default_indexes() -> Vec<CreateIndexOptions> {
    vec![
        CreateIndexOptions::new(
            "mastra_threads_resource_id_created_at_idx",
            "mastra_threads",
            vec!["resourceId".to_string(), "createdAt".to_string()],
        ),
        CreateIndexOptions::new(
            "mastra_messages_thread_id_created_at_idx",
            "mastra_messages",
            vec!["thread_id".to_string(), "createdAt".to_string()],
        ),
        CreateIndexOptions::new(
            "mastra_scorers_trace_id_span_id_created_at_idx",
            "mastra_scorers",
            vec!["traceId".to_string(), "spanId".to_string(), "createdAt".to_string()],
        ),
        CreateIndexOptions::new("mastra_ai_spans_trace_id_idx", "mastra_ai_spans", vec!["traceId".to_string()]),
        CreateIndexOptions::new(
            "mastra_ai_spans_parent_span_id_idx",
            "mastra_ai_spans",
            vec!["parentSpanId".to_string()],
        ),
        CreateIndexOptions::new("mastra_ai_spans_name_idx", "mastra_ai_spans", vec!["name".to_string()]),
        CreateIndexOptions::new("mastra_ai_spans_span_type_idx", "mastra_ai_spans", vec!["spanType".to_string()]),
        CreateIndexOptions::new(
            "mastra_ai_spans_entity_type_id_idx",
            "mastra_ai_spans",
            vec!["entityType".to_string(), "entityId".to_string()],
        ),
        CreateIndexOptions::new(
            "mastra_ai_spans_entity_type_name_idx",
            "mastra_ai_spans",
            vec!["entityType".to_string(), "name".to_string()],
        ),
        CreateIndexOptions::new(
            "mastra_ai_spans_org_user_idx",
            "mastra_ai_spans",
            vec!["organizationId".to_string(), "userId".to_string()],
        ),
    ]
}
