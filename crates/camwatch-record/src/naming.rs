use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

/// `MM-DD-YYYY HH-MM-SS`, zero padded.
pub fn clip_name(at: OffsetDateTime) -> String {
    let fmt = format_description!("[month]-[day]-[year] [hour]-[minute]-[second]");
    at.format(&fmt).unwrap_or_else(|_| at.unix_timestamp().to_string())
}

/// Wall clock in the user's local offset.
///
/// The offset is fixed when the clock is made. A DST switch during a long
/// session shifts clip names by the change until restart; the platform lookup
/// is refused once other threads exist, so it cannot be redone later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clock {
    offset: UtcOffset,
}

impl Clock {
    /// Must be called before the process spawns extra threads, otherwise the
    /// local offset cannot be determined and UTC is used.
    pub fn local() -> Self {
        Self { offset: UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC) }
    }

    pub fn with_offset(offset: UtcOffset) -> Self {
        Self { offset }
    }

    pub fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{datetime, offset};

    #[test]
    fn name_is_zero_padded_month_first() {
        assert_eq!(clip_name(datetime!(2024-03-07 09:05:03 UTC)), "03-07-2024 09-05-03");
        assert_eq!(clip_name(datetime!(1999-12-31 23:59:59 UTC)), "12-31-1999 23-59-59");
    }

    #[test]
    fn clock_reports_in_its_offset() {
        let c = Clock::with_offset(offset!(+02:00));
        assert_eq!(c.now().offset(), offset!(+02:00));
    }
}
