// LABPRIMER_BUILD_N is the build's unix time, or SOURCE_DATE_EPOCH for reproducible builds.
fn main() {
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    let stamp = std::env::var("SOURCE_DATE_EPOCH").ok().unwrap_or_else(|| {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
            .to_string()
    });
    println!("cargo:rustc-env=LABPRIMER_BUILD_N={stamp}");
}
