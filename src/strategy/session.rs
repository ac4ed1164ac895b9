use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// Local wall-clock instant at which the trading day's pools are seeded
pub const SESSION_OPEN: (u32, u32) = (9, 30);

/// Fixed local-time trading windows preceding the session open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Session {
    Asia,
    London,
    PreMarket,
}

impl Session {
    pub const ALL: [Session; 3] = [Session::Asia, Session::London, Session::PreMarket];

    pub fn name(&self) -> &'static str {
        match self {
            Session::Asia => "Asia",
            Session::London => "London",
            Session::PreMarket => "Pre-market",
        }
    }

    /// (days relative to the trading day, hour, minute) of start and end
    fn local_bounds(&self) -> ((i64, u32, u32), (i64, u32, u32)) {
        match self {
            Session::Asia => ((-1, 20, 0), (0, 3, 0)),
            Session::London => ((0, 3, 0), (0, 7, 0)),
            Session::PreMarket => ((0, 7, 0), (0, SESSION_OPEN.0, SESSION_OPEN.1)),
        }
    }

    /// UTC bounds of this session for `trading_day`, as a closed scan range
    ///
    /// The session is `[start, end)`; the returned end is the last minute
    /// inside it, so neighbouring sessions never share a candle.
    pub fn window(&self, tz: &Tz, trading_day: NaiveDate) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let ((start_day, start_h, start_m), (end_day, end_h, end_m)) = self.local_bounds();
        let start = local_to_utc(tz, trading_day + Duration::days(start_day), start_h, start_m)?;
        let end = local_to_utc(tz, trading_day + Duration::days(end_day), end_h, end_m)?;
        Some((start, end - Duration::minutes(1)))
    }
}

/// Local calendar date of `ts` in the exchange zone
pub fn trading_day(tz: &Tz, ts: DateTime<Utc>) -> NaiveDate {
    ts.with_timezone(tz).date_naive()
}

/// Whether `ts` falls exactly on the local session-open minute
pub fn is_session_open(tz: &Tz, ts: DateTime<Utc>) -> bool {
    let local = ts.with_timezone(tz);
    (local.hour(), local.minute()) == SESSION_OPEN
}

/// Earliest instant the next session-open seed will scan
///
/// Before the local open this is today's Asia start; from the open onward it
/// is the following day's. Candles from here on must stay in the window.
pub fn seed_horizon(tz: &Tz, ts: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let local = ts.with_timezone(tz);
    let mut day = local.date_naive();
    if (local.hour(), local.minute()) >= SESSION_OPEN {
        day = day.succ_opt()?;
    }
    Session::Asia.window(tz, day).map(|(start, _)| start)
}

/// Resolve a local wall-clock time; ambiguous times take the earlier instant
fn local_to_utc(tz: &Tz, date: NaiveDate, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
    tz.from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}
