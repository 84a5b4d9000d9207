//! Table formatting helpers for CLI output.

use comfy_table::{ContentArrangement, Table};
use rosforge_runtime::RunReport;

/// Create a styled table with the given headers.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_header(headers);
    table
}

/// One row per completed push, arch pushes first.
pub fn report_table(report: &RunReport) -> Table {
    let mut pushes: Vec<_> = report.pushes.iter().collect();
    pushes.sort_by(|a, b| {
        (a.kind as u8, &a.registry, &a.reference).cmp(&(b.kind as u8, &b.registry, &b.reference))
    });

    let mut table = new_table(&["KIND", "REGISTRY", "REFERENCE"]);
    for push in pushes {
        table.add_row(vec![
            push.kind.to_string(),
            push.registry.clone(),
            push.reference.clone(),
        ]);
    }
    table
}

/// `3 builds, 12 arch pushes, 12 manifest lists`
pub fn summary_line(report: &RunReport) -> String {
    format!(
        "{} {}, {} arch {}, {} manifest {}",
        report.builds,
        plural(report.builds, "build", "builds"),
        report.arch_pushes(),
        plural(report.arch_pushes(), "push", "pushes"),
        report.manifest_pushes(),
        plural(report.manifest_pushes(), "list", "lists"),
    )
}

fn plural<'a>(n: usize, one: &'a str, many: &'a str) -> &'a str {
    if n == 1 {
        one
    } else {
        many
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rosforge_runtime::{PushKind, PushRecord};

    fn report() -> RunReport {
        RunReport {
            builds: 1,
            pushes: vec![
                PushRecord {
                    kind: PushKind::Manifest,
                    registry: "docker.io".to_string(),
                    reference: "docker.io/sshawn/noetic:latest".to_string(),
                },
                PushRecord {
                    kind: PushKind::Arch,
                    registry: "docker.io".to_string(),
                    reference: "docker.io/sshawn/noetic:amd64".to_string(),
                },
            ],
        }
    }

    #[test]
    fn test_summary_line() {
        assert_eq!(summary_line(&report()), "1 build, 1 arch push, 1 manifest list");
        assert_eq!(
            summary_line(&RunReport::default()),
            "0 builds, 0 arch pushes, 0 manifest lists"
        );
    }

    #[test]
    fn test_report_table_lists_arch_first() {
        let rendered = report_table(&report()).to_string();
        let arch = rendered.find("noetic:amd64").unwrap();
        let manifest = rendered.find("noetic:latest").unwrap();
        assert!(arch < manifest);
    }
}
