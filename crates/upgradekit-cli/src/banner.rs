use std::path::Path;

use upgradekit_wizards::{WizardState, WizardStatus};

fn state_label(state: WizardState) -> &'static str {
    match state {
        WizardState::Done => "done",
        WizardState::Blocked => "blocked",
        WizardState::Necessary => "pending",
        WizardState::NotNecessary => "not needed",
    }
}

/// Print the wizard list in a box with the database location.
pub fn print_wizard_table(statuses: &[WizardStatus], db_path: &Path) {
    for line in render_wizard_box(statuses, db_path) {
        println!("{line}");
    }

    for status in statuses {
        if status.state == WizardState::Blocked {
            println!(
                "{} is blocked until {} hold(s); run `upgradekit run {}` to ensure them.",
                status.identifier,
                status.prerequisites.join(", "),
                status.identifier
            );
        }
    }
}

fn render_wizard_box(statuses: &[WizardStatus], db_path: &Path) -> Vec<String> {
    let version = env!("CARGO_PKG_VERSION");

    let dir_display = match std::env::var("HOME") {
        Ok(home) if !home.is_empty() => db_path.to_string_lossy().replace(&home, "~"),
        _ => db_path.to_string_lossy().to_string(),
    };

    // Layout
    let width = 70;
    let left_w = 33;
    let right_w = width - left_w - 6; // "│ " + "│  " + "│"

    let title = format!("upgradekit v{version}");
    let title_dashes = width - 2 - title.chars().count() - 5; // 2 for ╭╮, 5 for "─── " + " "
    let top = format!("╭─── {title} {}╮", "─".repeat(title_dashes));
    let bottom = format!("╰{}╯", "─".repeat(width - 2));

    let row = |l: &str, r: &str| format!("│ {:<left_w$}│  {:<right_w$}│", l, r);

    let mut lines = vec![
        top,
        row("  Database", &truncate(&dir_display, right_w)),
        row("", &"─".repeat(right_w - 2)),
    ];
    if statuses.is_empty() {
        lines.push(row("  no wizards registered", ""));
    }
    for status in statuses {
        lines.push(row(
            &format!("  {}", truncate(&status.identifier, left_w - 2)),
            state_label(status.state),
        ));
    }
    lines.push(bottom);
    lines
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let keep: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{keep}…")
    }
}
