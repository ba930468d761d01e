pub mod backend;
mod docker;
mod memory;
mod native;
mod process;

// Re-export the trait and both backends
pub use backend::SandboxBackend;
pub use docker::DockerBackend;
pub use native::NativeBackend;

use std::collections::HashMap;

use anyhow::{Context, Result};

use crate::config::{LanguageConfig, LimitsConfig, SandboxConfig, SandboxMode};

/// Recorded as a case's output when the deadline watcher had to kill it
pub const TIMEOUT_MARKER: &str = "process terminated due to timeout";

/// Creates the sandbox backend for one submission
///
/// In `auto` mode the containerized backend is chosen whenever the language
/// carries an image and a container runtime answers a ping; everything else
/// falls back to plain host processes. Each submission gets a fresh backend,
/// only the image cache inside the docker module is shared.
pub async fn create_backend(
    sandbox: &SandboxConfig,
    language: &LanguageConfig,
    limits: &LimitsConfig,
) -> Result<Box<dyn SandboxBackend>> {
    let containerize = match sandbox.mode {
        SandboxMode::Native => false,
        SandboxMode::Docker => true,
        SandboxMode::Auto => {
            if language.image.is_none() {
                log::info!("Language {} has no container image", language.name);
                false
            } else if !docker::daemon_available().await {
                log::warn!("Container runtime unreachable, falling back to host processes");
                false
            } else {
                true
            }
        }
    };

    if containerize {
        log::info!("Creating DockerBackend for language {}", language.name);
        let policy = load_seccomp_policy(sandbox)?;
        let backend = DockerBackend::new(language.clone(), limits.clone(), policy)?;
        Ok(Box::new(backend))
    } else {
        log::info!("Creating NativeBackend for language {}", language.name);
        Ok(Box::new(NativeBackend::new(language.clone(), limits.clone())))
    }
}

fn load_seccomp_policy(sandbox: &SandboxConfig) -> Result<Option<String>> {
    match &sandbox.seccomp_policy_path {
        Some(path) => {
            let policy = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read seccomp policy from {}", path.display()))?;
            Ok(Some(policy))
        }
        None => Ok(None),
    }
}

/// Applies %PLACEHOLDER% substitutions to every element of a command template
pub(crate) fn expand_template(template: &[String], mapping: &HashMap<&str, &str>) -> Vec<String> {
    template
        .iter()
        .map(|part| {
            let mut part = part.clone();
            for (placeholder, value) in mapping {
                part = part.replace(placeholder, value);
            }
            part
        })
        .collect()
}

/// Same substitution for a one-line shell command
pub(crate) fn expand_line(template: &str, mapping: &HashMap<&str, &str>) -> String {
    let mut line = template.to_string();
    for (placeholder, value) in mapping {
        line = line.replace(placeholder, value);
    }
    line
}

/// Cuts tool banners and absolute paths ahead of the first mention of `anchor`
pub(crate) fn trim_diagnostics(diagnostics: &str, anchor: &str) -> String {
    match diagnostics.find(anchor) {
        Some(position) => diagnostics[position..].to_string(),
        None => diagnostics.to_string(),
    }
}

/// Picks and trims the text reported for a rejected compile
pub(crate) fn compile_failure_reason(stderr: &str, stdout: &str, anchor: &str) -> String {
    let diagnostics = if stderr.trim().is_empty() { stdout } else { stderr };
    let trimmed = trim_diagnostics(diagnostics, anchor);
    if trimmed.trim().is_empty() {
        "compiler produced no diagnostics".to_string()
    } else {
        trimmed
    }
}

/// Buffers a case's stdin blob with the trailing newline line-wise readers need
pub(crate) fn shape_case_input(input: &str) -> Vec<u8> {
    let mut payload = input.as_bytes().to_vec();
    if !payload.ends_with(b"\n") {
        payload.push(b'\n');
    }
    payload
}
