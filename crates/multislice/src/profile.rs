//! Capturing of performance traces from a running workload.
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::Context;

use crate::common::utils::network::resolve_local_ip;
use crate::slice::SliceFuture;
use crate::slice::command::run_command;

/// Client that captures a trace from a process that exposes a profiler server.
pub trait TraceClient {
    /// Captures a trace from `target` for `duration` and stores it in `output`.
    fn trace<'a>(
        &'a self,
        target: &'a str,
        output: &'a str,
        duration: Duration,
    ) -> SliceFuture<'a, ()>;
}

/// Captures traces with the TensorFlow profiler client running in a Python subprocess.
pub struct TensorflowTraceClient {
    python: String,
}

impl TensorflowTraceClient {
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
        }
    }

    fn script(target: &str, output: &str, duration: Duration) -> String {
        format!(
            "import tensorflow\ntensorflow.profiler.experimental.client.trace({}, {}, {})\n",
            python_string(target),
            python_string(output),
            duration.as_millis()
        )
    }
}

impl Default for TensorflowTraceClient {
    fn default() -> Self {
        Self::new("python3")
    }
}

impl TraceClient for TensorflowTraceClient {
    fn trace<'a>(
        &'a self,
        target: &'a str,
        output: &'a str,
        duration: Duration,
    ) -> SliceFuture<'a, ()> {
        Box::pin(async move {
            let script = Self::script(target, output, duration);
            run_command(&[self.python.as_str(), "-c", script.as_str()])
                .await
                .with_context(|| format!("Cannot capture trace from {target}"))?;
            Ok(())
        })
    }
}

/// Quotes `value` as a Python string literal.
fn python_string(value: &str) -> String {
    // JSON strings are valid Python string literals
    serde_json::Value::from(value).to_string()
}

/// Captures a trace from the profiler server listening on `port` of the local host.
pub async fn trace_local(
    client: &dyn TraceClient,
    port: u16,
    output: &str,
    duration: Duration,
) -> crate::Result<()> {
    trace_host(client, resolve_local_ip().await?, port, output, duration).await
}

/// Captures a trace from the profiler server listening on `host:port`.
pub async fn trace_host(
    client: &dyn TraceClient,
    host: IpAddr,
    port: u16,
    output: &str,
    duration: Duration,
) -> crate::Result<()> {
    let target = SocketAddr::new(host, port).to_string();
    log::info!(
        "Capturing trace from {target} for {} into {output}",
        humantime::format_duration(duration)
    );
    client.trace(&target, output, duration).await?;
    log::info!("Trace was stored into {output}");
    Ok(())
}
