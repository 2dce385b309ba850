//! Projection of the rotation onto spreadsheet rows.

use chrono::{DateTime, Utc};
use rush_rotation::{rotation_order, Candidate, CandidateId};
use serde::Serialize;

/// Column headings, in sheet order.
pub const HEADER: [&str; 11] = [
    "Active",
    "Name",
    "Check In",
    "Check Out",
    "Avg Fit Rating",
    "Reds",
    "Greens",
    "Pro",
    "Con",
    "Brother Recs",
    "Interests",
];

/// Marker written in the `Active` column.
pub const ACTIVE_LABEL: &str = "ACTIVE";

const TIME_FORMAT: &str = "%I:%M %p";

/// One spreadsheet row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SheetRow(pub Vec<String>);

impl SheetRow {
    pub fn cells(&self) -> &[String] {
        &self.0
    }

    /// True if this row carries the active marker.
    pub fn is_active(&self) -> bool {
        self.0.first().is_some_and(|c| c == ACTIVE_LABEL)
    }

    /// The column headings as a row; written by publishers above the data.
    pub fn header() -> Self {
        Self(HEADER.iter().map(|h| h.to_string()).collect())
    }
}

/// One row per candidate, in rotation order.
pub fn build_rows(candidates: &[Candidate], active: Option<&CandidateId>) -> Vec<SheetRow> {
    rotation_order(candidates)
        .into_iter()
        .map(|c| candidate_row(c, active == Some(&c.id)))
        .collect()
}

fn candidate_row(candidate: &Candidate, is_active: bool) -> SheetRow {
    let d = &candidate.details;
    SheetRow(vec![
        if is_active { ACTIVE_LABEL } else { "" }.to_string(),
        candidate.name.clone(),
        format_time(d.check_in),
        format_time(d.check_out),
        d.mean_fit_rating
            .filter(|r| r.is_finite())
            .map(|r| format!("{r:.2}"))
            .unwrap_or_default(),
        d.bids.reds.to_string(),
        d.bids.greens.to_string(),
        d.bids.pro.to_string(),
        d.bids.con.to_string(),
        d.brother_recs.join(", "),
        d.interests.join(", "),
    ])
}

fn format_time(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.format(TIME_FORMAT).to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rush_rotation::{BidTally, CandidateDetails};

    use super::*;

    fn candidate(id: &str, key: i64) -> Candidate {
        Candidate::new(id.parse().unwrap(), id.to_uppercase(), key)
    }

    #[test]
    fn test_rows_follow_rotation_order_and_mark_active() {
        let candidates = vec![candidate("c", 3), candidate("a", 1), candidate("b", 2)];
        let active: CandidateId = "b".parse().unwrap();

        let rows = build_rows(&candidates, Some(&active));
        assert_eq!(rows.len(), 3, "one row per candidate, no header");

        let names: Vec<_> = rows.iter().map(|r| r.cells()[1].as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);

        let flagged: Vec<_> = rows.iter().map(SheetRow::is_active).collect();
        assert_eq!(flagged, vec![false, true, false]);
    }

    #[test]
    fn test_no_active_marks_nobody() {
        let rows = build_rows(&[candidate("a", 1)], None);
        assert!(!rows[0].is_active());
    }

    #[test]
    fn test_header_row() {
        let header = SheetRow::header();
        assert_eq!(header.cells().len(), HEADER.len());
        assert_eq!(header.cells()[0], "Active");
        assert!(!header.is_active());
    }

    #[test]
    fn test_detail_formatting() {
        let details = CandidateDetails {
            check_in: Some(Utc.with_ymd_and_hms(2026, 3, 14, 18, 5, 0).unwrap()),
            check_out: None,
            mean_fit_rating: Some(3.666_666),
            bids: BidTally {
                reds: 1,
                greens: 2,
                pro: 0,
                con: 4,
            },
            brother_recs: vec!["alex".into(), "sam".into()],
            interests: vec!["chess".into()],
        };
        let c = candidate("a", 1).with_details(details);

        let row = candidate_row(&c, false);
        assert_eq!(
            row.cells(),
            &[
                "", "A", "06:05 PM", "", "3.67", "1", "2", "0", "4", "alex, sam", "chess"
            ]
        );
    }

    #[test]
    fn test_row_width_matches_header() {
        let row = candidate_row(&candidate("a", 1), true);
        assert_eq!(row.cells().len(), HEADER.len());
        assert_eq!(row.cells()[4], "");
    }
}
