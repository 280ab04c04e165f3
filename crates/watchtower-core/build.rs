//! Build script for watchtower-core.
//!
//! Compiles the telemetry.proto file into Rust types and the ingest
//! service stubs using tonic.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure().compile_protos(&["proto/telemetry.proto"], &["proto"])?;

    // Re-run if the proto file changes
    println!("cargo:rerun-if-changed=proto/telemetry.proto");

    Ok(())
}
