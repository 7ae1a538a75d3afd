/// A published placement or eviction decision, emitted on the assignment-result stream for
/// callers that want to observe controller outcomes (test harnesses, CLIs).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    Bind { pod_name: String, node_name: String },
    Evict { pod_name: String },
}
