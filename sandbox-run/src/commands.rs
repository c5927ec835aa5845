use log::info;
use sandbox_core::capabilities::SystemCapabilities;

pub fn check_requirements() {
    info!("Checking sandbox requirements");
    println!("Checking sandbox requirements...\n");

    let caps = SystemCapabilities::detect();
    println!("{}", caps.summary());

    println!();
    println!(
        "  rooted mode:   {}",
        if caps.can_run_rooted() { "available" } else { "unavailable" }
    );
    println!(
        "  rootless mode: {}",
        if caps.can_run_rootless() { "available" } else { "unavailable" }
    );
}
