pub mod clock {
    use chrono::prelude::*;
    use chrono::{Days, TimeDelta};
    use std::time::Duration;

    // Woken this long after noon so the standard-time hour reads 12.
    const NOON_MARGIN: Duration = Duration::from_secs(60);

    /// Where the panel stands and which civil time it keeps.
    #[derive(Debug, Clone, PartialEq)]
    pub struct Location {
        pub latitude: f64,
        pub longitude: f64,
        pub altitude: f64,
        /// Standard (winter) offset from UTC.
        pub utc_offset_hours: i32,
        /// Apply the EU summer time rule on top of the standard offset.
        pub daylight_saving: bool,
    }

    /// Sunrise and sunset for one local date, and whether `now` lies between.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ScheduleWindow {
        pub sunrise: DateTime<Utc>,
        pub sunset: DateTime<Utc>,
        pub daytime: bool,
    }

    impl ScheduleWindow {
        /// Sunrise is inclusive, sunset exclusive.
        pub fn new(sunrise: DateTime<Utc>, sunset: DateTime<Utc>, now: DateTime<Utc>) -> Self {
            ScheduleWindow {
                sunrise,
                sunset,
                daytime: sunrise <= now && now < sunset,
            }
        }
    }

    /// Date of the last Sunday in `month`.
    pub fn last_sunday(year: i32, month: u32) -> Option<NaiveDate> {
        let first_of_next = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)
        }?;
        let last = first_of_next.pred_opt()?;
        let back = last.weekday().num_days_from_sunday();
        last.checked_sub_days(Days::new(back as u64))
    }

    fn switch_instant(year: i32, month: u32) -> Option<DateTime<Utc>> {
        Some(last_sunday(year, month)?.and_hms_opt(1, 0, 0)?.and_utc())
    }

    fn offset_from_hours(hours: i32) -> FixedOffset {
        FixedOffset::east_opt(hours * 3600).unwrap_or_else(|| {
            log::warn!("UTC offset {}h out of range, using UTC", hours);
            Utc.fix()
        })
    }

    pub struct Clock {
        location: Location,
    }

    impl Clock {
        pub fn new(location: Location) -> Clock {
            Clock { location }
        }

        /// Summer time runs from 01:00 UTC on the last Sunday of March to
        /// 01:00 UTC on the last Sunday of October.
        pub fn is_summer_time(&self, now: DateTime<Utc>) -> bool {
            if !self.location.daylight_saving {
                return false;
            }
            match (switch_instant(now.year(), 3), switch_instant(now.year(), 10)) {
                (Some(start), Some(end)) => start <= now && now < end,
                _ => false,
            }
        }

        pub fn standard_offset(&self) -> FixedOffset {
            offset_from_hours(self.location.utc_offset_hours)
        }

        pub fn offset(&self, now: DateTime<Utc>) -> FixedOffset {
            let hours = self.location.utc_offset_hours + i32::from(self.is_summer_time(now));
            offset_from_hours(hours)
        }

        /// Civil time, summer time included.
        pub fn local(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
            now.with_timezone(&self.offset(now))
        }

        /// `None` when the sun does not rise or set on this date.
        pub fn window(&self, now: DateTime<Utc>) -> Option<ScheduleWindow> {
            let date = self.local(now).date_naive();
            let times = sun_times::sun_times(
                date,
                self.location.latitude,
                self.location.longitude,
                self.location.altitude,
            );
            match times {
                Some((sunrise, sunset)) => Some(ScheduleWindow::new(sunrise, sunset, now)),
                None => {
                    log::warn!("No sunrise or sunset on {}", date);
                    None
                }
            }
        }

        /// The hour the sun stands roughly south, judged on standard time so
        /// summer time does not shift it by an hour.
        pub fn is_noon_hour(&self, now: DateTime<Utc>) -> bool {
            now.with_timezone(&self.standard_offset()).hour() == 12
        }

        /// Today's 12:00 standard time.
        pub fn noon(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
            let offset = self.standard_offset();
            now.with_timezone(&offset)
                .date_naive()
                .and_hms_opt(12, 0, 0)?
                .and_local_timezone(offset)
                .single()
                .map(|noon| noon.with_timezone(&Utc))
        }

        /// How long to suspend. A sleep that would jump over the noon hour is
        /// cut short to wake just after noon.
        pub fn suspend_for(&self, now: DateTime<Utc>, configured: Duration) -> Duration {
            let until_noon = match self.noon(now).map(|noon| (noon - now).to_std()) {
                Some(Ok(until)) if !until.is_zero() => until,
                _ => return configured,
            };
            if configured > until_noon {
                log::info!("Shortening sleep to {}s to wake at noon", until_noon.as_secs());
                until_noon + NOON_MARGIN
            } else {
                configured
            }
        }

        pub fn same_day(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
            self.local(a).date_naive() == self.local(b).date_naive()
        }

        /// Whole minutes from `since` to `now`, zero if the clock went backwards.
        pub fn minutes_since(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
            (now - since).max(TimeDelta::zero()).num_minutes()
        }

        pub fn timestamp(&self, now: DateTime<Utc>) -> String {
            self.local(now).format("%d.%m.%Y time %H:%M:%S").to_string()
        }
    }

}

pub use clock::{last_sunday, Clock, Location, ScheduleWindow};
