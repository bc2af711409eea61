use std::collections::BTreeMap;

/// Context tags attached to every envelope.
pub fn context_tags() -> BTreeMap<String, String> {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    let role = std::env::current_exe()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());

    let mut tags = BTreeMap::new();
    tags.insert("ai.cloud.role".to_string(), role);
    tags.insert("ai.cloud.roleInstance".to_string(), host.clone());
    tags.insert("ai.device.id".to_string(), host);
    tags.insert(
        "ai.internal.sdkVersion".to_string(),
        format!("rask-metrics:{}", env!("CARGO_PKG_VERSION")),
    );
    tags
}
