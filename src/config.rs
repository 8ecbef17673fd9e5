use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use crate::storage::PROFILE_FILE;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Memostep room server")]
pub struct ServerArgs {
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,
    /// Where the local profile file lives.
    #[arg(long, env = "DATA_DIR", default_value = ".data")]
    pub data_dir: PathBuf,
    /// Built client to serve; falls back to `dist/client` when present.
    #[arg(long, env = "STATIC_DIR")]
    pub static_dir: Option<PathBuf>,
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

impl ServerArgs {
    pub fn profile_path(&self) -> PathBuf {
        self.data_dir.join(PROFILE_FILE)
    }

    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    pub fn resolve_static_dir(&self) -> Option<PathBuf> {
        if let Some(path) = &self.static_dir {
            if path.join("index.html").is_file() {
                return Some(path.clone());
            }
        }
        let candidates = [PathBuf::from("dist/client"), PathBuf::from("../../dist/client")];
        candidates
            .into_iter()
            .find(|path| path.join("index.html").is_file())
    }
}

/// Installs the fmt subscriber on stderr. An invalid filter falls back to `info`.
pub fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let args = ServerArgs::parse_from([
            "server",
            "--port",
            "9001",
            "--data-dir",
            "/tmp/memostep",
            "--log-level",
            "debug",
        ]);
        assert_eq!(args.port, 9001);
        assert_eq!(args.bind_addr(), "0.0.0.0:9001");
        assert_eq!(args.profile_path(), PathBuf::from("/tmp/memostep").join(PROFILE_FILE));
        assert_eq!(args.log_level, "debug");
    }

    #[test]
    fn missing_static_dir_resolves_to_none_when_nothing_is_built() {
        let args = ServerArgs::parse_from([
            "server",
            "--static-dir",
            "/definitely/not/here",
        ]);
        assert_eq!(args.static_dir.as_deref(), Some(std::path::Path::new("/definitely/not/here")));
    }
}
