//! Plain-text relay table

use crate::service::RelayInfo;

const HEADERS: [&str; 3] = ["UUID", "Tunnel-Type", "Tunnel"];

/// Render relays as a bordered table sorted by id.
pub fn format_tunnel_table(relays: &[RelayInfo]) -> String {
    let mut sorted: Vec<&RelayInfo> = relays.iter().collect();
    sorted.sort_by_key(|info| info.id);

    let rows: Vec<[String; 3]> = sorted
        .iter()
        .map(|info| [info.id.to_string(), info.kind.to_string(), info.description()])
        .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(cell.len());
        }
    }

    let border = format!(
        "+{}+\n",
        widths
            .iter()
            .map(|w| "-".repeat(w + 2))
            .collect::<Vec<_>>()
            .join("+")
    );
    let line = |cells: [&str; 3]| {
        format!(
            "| {:<w0$} | {:<w1$} | {:<w2$} |\n",
            cells[0],
            cells[1],
            cells[2],
            w0 = widths[0],
            w1 = widths[1],
            w2 = widths[2]
        )
    };

    let mut out = String::new();
    out.push_str(&border);
    out.push_str(&line(HEADERS));
    out.push_str(&border);
    for row in &rows {
        out.push_str(&line([row[0].as_str(), row[1].as_str(), row[2].as_str()]));
    }
    if !rows.is_empty() {
        out.push_str(&border);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::RelayKind;
    use chrono::Utc;
    use uuid::Uuid;

    fn info(id: u128, kind: RelayKind, listen: &str, target: &str) -> RelayInfo {
        RelayInfo {
            id: Uuid::from_u128(id),
            kind,
            listen: listen.to_string(),
            target: target.to_string(),
            started_at: Utc::now(),
        }
    }

    #[test]
    fn test_table_sorted_by_id() {
        let relays = vec![
            info(2, RelayKind::Reverse, "0.0.0.0:9000", "127.0.0.1:3000"),
            info(1, RelayKind::Forward, "127.0.0.1:5432", "db.internal:5432"),
        ];
        let table = format_tunnel_table(&relays);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 6);
        assert!(lines[1].contains("UUID") && lines[1].contains("Tunnel-Type"));
        assert!(lines[3].contains("00000000-0000-0000-0000-000000000001"));
        assert!(lines[3].contains("forward") && lines[3].contains("127.0.0.1:5432 -> db.internal:5432"));
        assert!(lines[4].contains("reverse") && lines[4].contains("0.0.0.0:9000 -> 127.0.0.1:3000"));

        let width = lines[0].len();
        assert!(lines.iter().all(|l| l.len() == width));
    }

    #[test]
    fn test_empty_table_has_header_only() {
        let table = format_tunnel_table(&[]);
        assert_eq!(table.lines().count(), 3);
        assert!(table.contains("| UUID | Tunnel-Type | Tunnel |"));
    }
}
