//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `taskdeck_core` linkage.
//! - Keep output deterministic for quick local sanity checks.

use taskdeck_core::db::open_db_in_memory;
use taskdeck_core::{ItemDraft, ItemService, NotificationBus};

fn main() {
    println!("taskdeck_core version={}", taskdeck_core::core_version());

    let conn = match open_db_in_memory() {
        Ok(conn) => conn,
        Err(err) => {
            eprintln!("store open failed: {err}");
            std::process::exit(1);
        }
    };

    let mut items = ItemService::new(conn, NotificationBus::new());
    let draft = ItemDraft {
        subject: "smoke probe".to_string(),
        description: "verifies store wiring".to_string(),
        ..ItemDraft::default()
    };

    match items.add_item(&draft) {
        Ok(item) => println!("probe item created version={}", item.version),
        Err(err) => {
            eprintln!("probe add failed: {err}");
            std::process::exit(1);
        }
    }

    match items.get_all_items(false) {
        Ok(all) => println!("live items={}", all.len()),
        Err(err) => {
            eprintln!("probe list failed: {err}");
            std::process::exit(1);
        }
    }
}
