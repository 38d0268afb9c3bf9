use lorepin_server::{default_db_path, DEFAULT_ADDR};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Base URL the web front-end uses to reach the local API.
#[tauri::command]
fn engine_base_url() -> String {
    format!("http://{DEFAULT_ADDR}")
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();

    // Start the local API server inside the desktop process.
    // The web shell talks to it over HTTP, same as any non-Tauri client.
    tauri::async_runtime::spawn(async move {
        let Ok(addr) = DEFAULT_ADDR.parse() else {
            tracing::error!(addr = DEFAULT_ADDR, "invalid listen address");
            return;
        };
        if let Err(err) = lorepin_server::serve(addr, default_db_path()).await {
            tracing::error!(error = %err, "lorepin server exited");
        }
    });

    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .invoke_handler(tauri::generate_handler![engine_base_url])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
