use std::sync::Arc;

use async_trait::async_trait;

use super::{Tool, ToolCtx, ToolResult};

const MIN_CONTAINER_MEMORY_MB: u64 = 128;
const MAX_CONTAINER_MEMORY_MB: u64 = 65_536;

/// Dev-container names as the container API accepts them: alphanumeric
/// head, then alphanumerics plus `_ . -`, at most 64 chars.
fn valid_container_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    name.len() <= 64
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
}

async fn proxy_get(ctx: &ToolCtx, path: &str) -> ToolResult {
    let base = match &ctx.docker_proxy_url {
        Some(u) => u.trim_end_matches('/'),
        None => return ToolResult::error("container API is not configured (DOCKER_PROXY_URL)"),
    };
    match ctx.http.get(format!("{base}{path}")).send().await {
        Ok(resp) if resp.status().is_success() => match resp.text().await {
            Ok(body) => ToolResult::success(body),
            Err(e) => ToolResult::error(format!("container API read failed: {e}")),
        },
        Ok(resp) => ToolResult::error(format!("container API returned {}", resp.status())),
        Err(e) => ToolResult::error(format!("container API unreachable: {e}")),
    }
}

async fn proxy_post(ctx: &ToolCtx, path: &str, body: serde_json::Value) -> ToolResult {
    let base = match &ctx.docker_proxy_url {
        Some(u) => u.trim_end_matches('/'),
        None => return ToolResult::error("container API is not configured (DOCKER_PROXY_URL)"),
    };
    match ctx.http.post(format!("{base}{path}")).json(&body).send().await {
        Ok(resp) if resp.status().is_success() => match resp.text().await {
            Ok(body) => ToolResult::success(body),
            Err(e) => ToolResult::error(format!("container API read failed: {e}")),
        },
        Ok(resp) => ToolResult::error(format!("container API returned {}", resp.status())),
        Err(e) => ToolResult::error(format!("container API unreachable: {e}")),
    }
}

/// Per-container resource usage. Available to every thread.
pub struct ContainerStatsTool {
    ctx: Arc<ToolCtx>,
}

impl ContainerStatsTool {
    pub fn new(ctx: Arc<ToolCtx>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for ContainerStatsTool {
    fn name(&self) -> &str {
        "get_container_stats"
    }

    fn description(&self) -> &str {
        "Resource usage (cpu, memory) of the running dev containers."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _input: serde_json::Value) -> ToolResult {
        proxy_get(&self.ctx, "/containers/stats").await
    }
}

/// Host-level telemetry from local /proc. Available to every thread and
/// independent of the container API.
pub struct SystemStatusTool;

impl SystemStatusTool {
    pub fn new(_ctx: Arc<ToolCtx>) -> Self {
        Self
    }
}

#[async_trait]
impl Tool for SystemStatusTool {
    fn name(&self) -> &str {
        "get_system_status"
    }

    fn description(&self) -> &str {
        "Host load average, memory and uptime."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _input: serde_json::Value) -> ToolResult {
        let loadavg = std::fs::read_to_string("/proc/loadavg").unwrap_or_default();
        let uptime = std::fs::read_to_string("/proc/uptime").unwrap_or_default();
        let meminfo = std::fs::read_to_string("/proc/meminfo")
            .map(|m| m.lines().take(3).collect::<Vec<_>>().join("\n"))
            .unwrap_or_default();
        if loadavg.is_empty() && meminfo.is_empty() {
            return ToolResult::error("host telemetry unavailable on this platform");
        }
        ToolResult::success(format!(
            "load: {}uptime: {}{}",
            loadavg,
            uptime,
            meminfo
        ))
    }
}

/// Master-only: host memory overview from the container API.
pub struct HostMemoryTool {
    ctx: Arc<ToolCtx>,
}

impl HostMemoryTool {
    pub fn new(ctx: Arc<ToolCtx>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for HostMemoryTool {
    fn name(&self) -> &str {
        "get_host_memory"
    }

    fn description(&self) -> &str {
        "Host memory totals and per-container reservations."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _input: serde_json::Value) -> ToolResult {
        proxy_get(&self.ctx, "/host/memory").await
    }
}

/// Master-only: adjust a dev container's memory limit.
pub struct UpdateContainerMemoryTool {
    ctx: Arc<ToolCtx>,
}

impl UpdateContainerMemoryTool {
    pub fn new(ctx: Arc<ToolCtx>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for UpdateContainerMemoryTool {
    fn name(&self) -> &str {
        "update_container_memory"
    }

    fn description(&self) -> &str {
        "Set the memory limit (in MiB) of a dev container."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "container": { "type": "string", "description": "Container name." },
                "memoryMb": {
                    "type": "integer",
                    "minimum": MIN_CONTAINER_MEMORY_MB,
                    "maximum": MAX_CONTAINER_MEMORY_MB
                }
            },
            "required": ["container", "memoryMb"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let container = match input.get("container").and_then(|v| v.as_str()) {
            Some(c) if valid_container_name(c) => c,
            Some(c) => return ToolResult::error(format!("invalid container name: {c}")),
            None => return ToolResult::error("missing 'container'"),
        };
        let memory = match input.get("memoryMb").and_then(|v| v.as_u64()) {
            Some(m) if (MIN_CONTAINER_MEMORY_MB..=MAX_CONTAINER_MEMORY_MB).contains(&m) => m,
            Some(m) => {
                return ToolResult::error(format!(
                    "memoryMb {m} out of range [{MIN_CONTAINER_MEMORY_MB}, {MAX_CONTAINER_MEMORY_MB}]"
                ))
            }
            None => return ToolResult::error("missing 'memoryMb'"),
        };
        proxy_post(
            &self.ctx,
            &format!("/containers/{container}/memory"),
            serde_json::json!({ "memoryMb": memory }),
        )
        .await
    }
}

/// Master-only: create/start/stop/delete dev containers.
pub struct ContainerLifecycleTool {
    ctx: Arc<ToolCtx>,
}

impl ContainerLifecycleTool {
    pub fn new(ctx: Arc<ToolCtx>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for ContainerLifecycleTool {
    fn name(&self) -> &str {
        "manage_container"
    }

    fn description(&self) -> &str {
        "Create, start, stop or delete a dev container."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["create", "start", "stop", "delete"] },
                "container": { "type": "string", "description": "Container name." }
            },
            "required": ["action", "container"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let action = match input.get("action").and_then(|v| v.as_str()) {
            Some(a @ ("create" | "start" | "stop" | "delete")) => a,
            Some(a) => return ToolResult::error(format!("unknown action: {a}")),
            None => return ToolResult::error("missing 'action'"),
        };
        let container = match input.get("container").and_then(|v| v.as_str()) {
            Some(c) if valid_container_name(c) => c,
            Some(c) => return ToolResult::error(format!("invalid container name: {c}")),
            None => return ToolResult::error("missing 'container'"),
        };
        proxy_post(
            &self.ctx,
            &format!("/containers/{container}/{action}"),
            serde_json::json!({}),
        )
        .await
    }
}
