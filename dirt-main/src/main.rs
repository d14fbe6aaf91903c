use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dirt::{App, Headless};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut app = App::new(Box::new(Headless::new(1280, 720)));

    let model = app.model().clone();
    model.set("main.settings", "settings.ini");
    let args: Vec<String> = std::env::args().collect();
    model.set("main.argc", args.len() as f32);
    for (i, arg) in args.iter().enumerate() {
        model.set(&format!("main.args.{i}"), arg.as_str());
    }

    app.boot();
    while app.running() {
        app.update();
    }
    info!("shutting down");
    Ok(())
}
