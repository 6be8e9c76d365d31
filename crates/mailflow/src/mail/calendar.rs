use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};

const GOOGLE_CALENDAR_URL: &str = "https://calendar.google.com/calendar/render";

/// Timed events without an end are assumed to last this long.
const DEFAULT_EVENT_HOURS: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventWhen {
    At(DateTime<Utc>),
    /// Wall-clock time with no offset; the calendar shows it in the viewer's zone.
    Floating(NaiveDateTime),
    AllDay(NaiveDate),
}

fn parse_event_date(raw: &str) -> Option<EventWhen> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(EventWhen::At(dt.with_timezone(&Utc)));
    }
    for fmt in ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(EventWhen::Floating(naive));
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(EventWhen::AllDay)
}

/// Google Calendar "add event" link, or `None` when the date is free text.
pub fn google_calendar_link(title: &str, event_date: &str, location: &str) -> Option<String> {
    let dates = match parse_event_date(event_date)? {
        EventWhen::At(start) => {
            let end = start + Duration::hours(DEFAULT_EVENT_HOURS);
            format!(
                "{}/{}",
                start.format("%Y%m%dT%H%M%SZ"),
                end.format("%Y%m%dT%H%M%SZ")
            )
        }
        EventWhen::Floating(start) => {
            let end = start + Duration::hours(DEFAULT_EVENT_HOURS);
            format!(
                "{}/{}",
                start.format("%Y%m%dT%H%M%S"),
                end.format("%Y%m%dT%H%M%S")
            )
        }
        EventWhen::AllDay(day) => {
            let next = day.succ_opt()?;
            format!("{}/{}", day.format("%Y%m%d"), next.format("%Y%m%d"))
        }
    };

    let mut url = format!(
        "{GOOGLE_CALENDAR_URL}?action=TEMPLATE&text={}&dates={}",
        urlencoding::encode(title),
        dates
    );
    if !location.trim().is_empty() {
        url.push_str("&location=");
        url.push_str(&urlencoding::encode(location));
    }
    Some(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timed_event_spans_two_hours() {
        let link = google_calendar_link("Spring Meetup", "2026-04-01T18:30:00+09:00", "Hall A")
            .unwrap();
        assert!(link.contains("text=Spring%20Meetup"));
        assert!(link.contains("dates=20260401T093000Z/20260401T113000Z"));
        assert!(link.ends_with("&location=Hall%20A"));
    }

    #[test]
    fn naive_time_stays_floating() {
        let link = google_calendar_link("Spring Meetup", "2026-04-01T18:30", "").unwrap();
        assert!(link.contains("dates=20260401T183000/20260401T203000"));
        assert!(!link.contains("00Z"));

        let link = google_calendar_link("Late", "2026-04-01 23:15", "").unwrap();
        assert!(link.contains("dates=20260401T231500/20260402T011500"));
    }

    #[test]
    fn date_only_is_all_day() {
        let link = google_calendar_link("Fair", "2026-12-31", "").unwrap();
        assert!(link.contains("dates=20261231/20270101"));
        assert!(!link.contains("location="));
    }

    #[test]
    fn free_text_date_yields_no_link() {
        assert_eq!(google_calendar_link("x", "next spring", "y"), None);
    }
}
