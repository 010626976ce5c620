pub mod github;
pub mod web;

use toolgate_core::catalog::Toolkit;

/// Toolkits shipped with toolgate
pub fn builtin() -> anyhow::Result<Vec<Toolkit>> {
    Ok(vec![
        web::toolkit(web::default_allowed_domains())?,
        github::toolkit(github::GITHUB_API)?,
    ])
}
