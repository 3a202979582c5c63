#[cfg(not(unix))]
compile_error!("Only unix platforms are currently supported");

use courier::{Courier, CourierConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CourierConfig::discover()?;

    Courier::new(config).run().await
}
