pub const LABPRIMER_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const LABPRIMER_BUILD_N: &str = env!("LABPRIMER_BUILD_N");

pub fn version_cli_text() -> String {
    format!(
        "LabPrimer {}\nBuild {}\nProtocol {}\nExon-junction primer design with in-silico PCR validation",
        LABPRIMER_VERSION,
        LABPRIMER_BUILD_N,
        labprimer_protocol::PROTOCOL_VERSION
    )
}
