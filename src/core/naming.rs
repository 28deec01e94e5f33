//! The single hostname construction law.

/// Join `segments` with `.`, skipping empty ones.
pub fn join_skip_empty(segments: &[&str]) -> String {
    segments
        .iter()
        .filter(|segment| !segment.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(".")
}

/// Fully-qualified virtual host for a fragment, tenant segment and system alias.
pub fn qualified_host(fragment: &str, tenant_id: &str, system_alias: &str) -> String {
    join_skip_empty(&[fragment, tenant_id, system_alias])
}
