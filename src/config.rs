use std::net::SocketAddr;

use anyhow::bail;
use clap::Args;

/// Server settings, read from flags with environment fallbacks.
#[derive(Debug, Clone, Args)]
pub struct Cfg {
    /// Address the HTTP server listens on
    #[arg(long, env = "OSTOV_BIND", default_value = "127.0.0.1:3000")]
    pub bind: SocketAddr,

    /// Postgres connection string; records are kept in memory when absent
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    #[arg(long, env = "OSTOV_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,

    /// Days a login session stays valid
    #[arg(long, env = "OSTOV_SESSION_DAYS", default_value_t = 2)]
    pub session_days: i64,

    /// Rows per listing page unless `per_page` asks otherwise
    #[arg(long, env = "OSTOV_PAGE_SIZE", default_value_t = 25)]
    pub page_size: u64,

    #[arg(long, env = "OSTOV_MAX_PAGE_SIZE", default_value_t = 100)]
    pub max_page_size: u64,

    #[arg(long, env = "OSTOV_ADMIN_USERNAME", default_value = "admin")]
    pub admin_username: String,

    /// Creates the staff account `admin_username` at startup if it is missing
    #[arg(long, env = "OSTOV_ADMIN_PASSWORD", hide_env_values = true)]
    pub admin_password: Option<String>,
}

impl Default for Cfg {
    fn default() -> Self {
        Cfg {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            database_url: None,
            max_connections: 5,
            session_days: 2,
            page_size: 25,
            max_page_size: 100,
            admin_username: "admin".to_string(),
            admin_password: None,
        }
    }
}

impl Cfg {
    pub fn check(&self) -> anyhow::Result<()> {
        if self.max_connections == 0 {
            bail!("max_connections must be at least 1");
        }
        if self.session_days < 1 {
            bail!("session_days must be at least 1, got {}", self.session_days);
        }
        if self.page_size == 0 || self.max_page_size == 0 {
            bail!("page sizes must be at least 1");
        }
        if self.page_size > self.max_page_size {
            bail!(
                "page_size ({}) exceeds max_page_size ({})",
                self.page_size,
                self.max_page_size
            );
        }
        if self.admin_username.trim().is_empty() {
            bail!("admin_username may not be blank");
        }
        Ok(())
    }
}
