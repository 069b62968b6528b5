use quickdiagrams_db::MigrationStatus;

/// Print a boxed summary of the store's migration state.
pub fn print_status(store: &str, status: &MigrationStatus) {
    for line in status_lines(store, status) {
        println!("{line}");
    }
}

fn status_lines(store: &str, status: &MigrationStatus) -> Vec<String> {
    let version = env!("CARGO_PKG_VERSION");

    let store_display = match std::env::var("HOME") {
        Ok(home) if !home.is_empty() => store.replace(&home, "~"),
        _ => store.to_string(),
    };
    let state = if status.is_up_to_date() {
        "up to date"
    } else {
        "migrations pending"
    };

    // Layout
    let width = 70;
    let label_w = 12;
    let value_w = width - label_w - 4; // 4 for "│ " + " │"

    let title = format!("QuickDiagrams v{version}");
    let title_dashes = width - 2 - title.len() - 5; // 2 for ╭╮, 5 for "─── " + " "
    let top = format!("╭─── {title} {}╮", "─".repeat(title_dashes));
    let bottom = format!("╰{}╯", "─".repeat(width - 2));

    let row = |l: &str, r: &str| {
        let r = truncate(r, value_w);
        format!("│ {:<label_w$}{:<value_w$} │", l, r)
    };

    vec![
        top,
        row("", ""),
        row("Store", &store_display),
        row("State", state),
        row("Applied", &join_versions(&status.applied)),
        row("Pending", &join_versions(&status.pending)),
        row("Unknown", &join_versions(&status.unknown)),
        row("", ""),
        bottom,
    ]
}

fn join_versions(versions: &[i64]) -> String {
    if versions.is_empty() {
        "none".to_string()
    } else {
        versions
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn truncate(s: &str, max: usize) -> String {
    let count = s.chars().count();
    if count <= max {
        return s.to_string();
    }
    let tail: String = s.chars().skip(count - (max - 1)).collect();
    format!("…{tail}")
}
