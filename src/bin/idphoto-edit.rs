//! ID photo editing CLI
//!
//! Command-line interface to the idphoto-edit library with ONNX Runtime and
//! Tract backends.

use idphoto_edit::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}
