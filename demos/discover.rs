use std::sync::Arc;

use escea_lan::{Config, Controller, DiscoveryService, Error, Listener};
use tracing_subscriber::EnvFilter;

struct Printer;

impl Listener for Printer {
    fn controller_discovered(&self, ctrl: &Controller) {
        println!("found {} at {}", ctrl.serial(), ctrl.addr());
        print_state(ctrl);
    }

    fn controller_disconnected(&self, ctrl: &Controller, reason: &Error) {
        println!("{} disconnected: {}", ctrl.serial(), reason);
    }

    fn controller_reconnected(&self, ctrl: &Controller) {
        println!("{} reconnected", ctrl.serial());
    }

    fn controller_update(&self, ctrl: &Controller) {
        print_state(ctrl);
    }
}

fn print_state(ctrl: &Controller) {
    let room = match ctrl.current_temp() {
        Some(temp) => format!("{}°", temp),
        None => "unknown".to_string(),
    };
    println!(
        "  {} [{}] {} fan={} set={}° room={}",
        ctrl.serial(),
        ctrl.state(),
        if ctrl.is_on() { "on" } else { "off" },
        ctrl.fan(),
        ctrl.desired_temp(),
        room,
    );
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let service = DiscoveryService::start_udp(Config::default())?;
    service.add_listener(Arc::new(Printer));

    println!("Searching for fireplaces, Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    service.close().await;
    Ok(())
}
