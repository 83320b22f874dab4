use anyhow::Result;

use crate::client::GoogleClient;
use crate::config::Config;

/// Query every configured site and print an access table.
///
/// Every site is tried; the command fails afterwards if any was
/// inaccessible.
pub async fn check_sites(config: &Config) -> Result<()> {
    let client = GoogleClient::from_config(config)?;
    let sites = config.sync.sites();

    println!("{:<48} {:<8} DETAIL", "SITE", "STATUS");
    let mut failed = 0;
    for site in &sites {
        match client.check_site_access(site).await {
            Ok(()) => println!("{:<48} {:<8} -", site, "OK"),
            Err(e) => {
                failed += 1;
                tracing::warn!(site = %site, error = %e, "site access check failed");
                println!("{:<48} {:<8} {}", site, "DENIED", e);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} site(s) inaccessible", failed, sites.len());
    }
    Ok(())
}
