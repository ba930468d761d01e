use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "codebox", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file; built-in defaults apply when omitted
    #[arg(long = "config", short = 'c')]
    pub config_path: Option<String>,

    /// Listen address in host:port form, overriding the configuration file
    #[arg(long = "listen", short = 'l')]
    pub listen: Option<String>,

    /// Number of execution workers
    #[arg(long = "workers", short = 'w', default_value_t = 2)]
    pub workers: u8,
}

impl CliArgs {
    /// Load the configuration from the specified file and apply CLI overrides
    pub fn to_config(&self) -> std::io::Result<Config> {
        let mut config = match &self.config_path {
            None => Config::default(),
            Some(path) => {
                let file = std::fs::File::open(path)?;
                let reader = std::io::BufReader::new(file);
                serde_json::from_reader(reader).map_err(std::io::Error::from)?
            }
        };
        if let Some(listen) = &self.listen {
            let (address, port) = parse_listen(listen)?;
            config.server.bind_address = Some(address);
            config.server.bind_port = Some(port);
        }
        Ok(config)
    }
}

fn parse_listen(listen: &str) -> std::io::Result<(String, u16)> {
    let invalid = || {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid listen address {listen}, expected host:port"),
        )
    };
    let (address, port) = listen.rsplit_once(':').ok_or_else(invalid)?;
    let port = port.parse().map_err(|_| invalid())?;
    Ok((address.to_string(), port))
}

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub limits: LimitsConfig,
    pub sandbox: SandboxConfig,
    pub languages: Vec<LanguageConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            limits: LimitsConfig::default(),
            sandbox: SandboxConfig::default(),
            languages: default_languages(),
        }
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
    /// Shared secret clients must present in the `auth` header; unset disables the check
    pub auth_secret: Option<String>,
}

/// Resource ceilings applied to every submission
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    pub case_timeout: MilliSecond,
    pub compile_timeout: MilliSecond,
    pub memory_limit: ByteSize,
    pub sample_interval: MilliSecond,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            case_timeout: MilliSecond(5000),
            compile_timeout: MilliSecond(30000),
            memory_limit: ByteSize(256 * 1024 * 1024),
            sample_interval: MilliSecond(10),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MilliSecond(pub u64);

impl MilliSecond {
    pub fn duration(self) -> Duration {
        Duration::from_millis(self.0)
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteSize(pub u64);

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SandboxConfig {
    pub mode: SandboxMode,
    /// Root directory for submission workspaces; a per-user cache dir when unset
    pub workspace_root: Option<PathBuf>,
    /// Substrings that get a submission rejected before anything is written to disk
    pub banned_tokens: Vec<String>,
    /// Overrides the built-in seccomp policy applied to containers
    pub seccomp_policy_path: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            mode: SandboxMode::Auto,
            workspace_root: None,
            banned_tokens: default_banned_tokens(),
            seccomp_policy_path: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SandboxMode {
    /// Containerized when the language has an image and a runtime is reachable
    #[default]
    Auto,
    Native,
    Docker,
}

#[derive(Deserialize, Debug, Clone)]
pub struct LanguageConfig {
    pub name: String,
    /// Name the source file is saved under inside the workspace
    pub file_name: String,
    /// Symbol compiler diagnostics are trimmed to; defaults to the source file stem
    #[serde(default)]
    pub entry_symbol: Option<String>,
    /// Host compile command; interpreted languages leave this unset
    #[serde(default)]
    pub compile_command: Option<Vec<String>>,
    /// Host run command, one process per test case
    pub run_command: Vec<String>,
    /// Container image for the docker backend
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub container_compile_command: Option<String>,
    #[serde(default)]
    pub container_run_command: Option<String>,
}

impl LanguageConfig {
    /// Anchor used to strip compiler noise ahead of the first real diagnostic
    pub fn diagnostic_anchor(&self) -> &str {
        match &self.entry_symbol {
            Some(symbol) => symbol,
            None => self.file_name.split('.').next().unwrap_or(&self.file_name),
        }
    }
}

pub fn default_banned_tokens() -> Vec<String> {
    vec!["File".to_string(), "Files".to_string(), "exec".to_string()]
}

pub fn default_languages() -> Vec<LanguageConfig> {
    vec![
        LanguageConfig {
            name: "java".to_string(),
            file_name: "Main.java".to_string(),
            entry_symbol: None,
            compile_command: Some(
                ["javac", "-encoding", "utf-8", "%SOURCE%"]
                    .map(str::to_string)
                    .to_vec(),
            ),
            run_command: ["java", "-Xmx256M", "-Dfile.encoding=UTF-8", "-cp", "%DIR%", "Main"]
                .map(str::to_string)
                .to_vec(),
            image: Some("openjdk:8-alpine".to_string()),
            container_compile_command: Some(
                "javac -encoding utf-8 %GUEST_DIR%/Main.java".to_string(),
            ),
            container_run_command: Some("java -cp %GUEST_DIR% Main".to_string()),
        },
        LanguageConfig {
            name: "cpp".to_string(),
            file_name: "Main.cpp".to_string(),
            entry_symbol: None,
            compile_command: Some(
                ["g++", "-O2", "-o", "%DIR%/main", "%SOURCE%"]
                    .map(str::to_string)
                    .to_vec(),
            ),
            run_command: vec!["%DIR%/main".to_string()],
            image: Some("gcc:latest".to_string()),
            container_compile_command: Some(
                "g++ -O2 -o %GUEST_DIR%/main %GUEST_DIR%/Main.cpp".to_string(),
            ),
            container_run_command: Some("%GUEST_DIR%/main".to_string()),
        },
    ]
}
