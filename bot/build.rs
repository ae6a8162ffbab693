//! Stamps the revision and build date reported by `deploybot --version`

use std::env;
use std::process::Command;

use chrono::{DateTime, Utc};

/// Same format the workers report for deployed revisions
fn describe_revision() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let revision = String::from_utf8(output.stdout).ok()?;
    Some(revision.trim().to_string()).filter(|r| !r.is_empty())
}

/// Honours SOURCE_DATE_EPOCH for reproducible builds
fn build_date() -> String {
    let date = env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|epoch| epoch.trim().parse::<i64>().ok())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now);
    date.to_rfc3339()
}

fn main() {
    let revision = describe_revision().unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=DEPLOYBOT_REVISION={}", revision);
    println!("cargo:rustc-env=DEPLOYBOT_BUILD_DATE={}", build_date());

    // The repository root is one level above the member crate
    println!("cargo:rerun-if-changed=../.git/HEAD");
    println!("cargo:rerun-if-changed=../.git/refs/tags");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
}
