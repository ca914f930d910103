use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
enum LogFile {
    Combat,
    Error,
    Persistence,
}

impl LogFile {
    const ALL: [LogFile; 3] = [LogFile::Combat, LogFile::Error, LogFile::Persistence];

    fn file_name(self) -> &'static str {
        match self {
            LogFile::Combat => "combat.log",
            LogFile::Error => "error.log",
            LogFile::Persistence => "persistence.log",
        }
    }

    /// Error lines are grepped by tools; they get no banner.
    fn wants_header(self) -> bool {
        self != LogFile::Error
    }
}

static LOGGER: OnceLock<Mutex<BTreeMap<LogFile, File>>> = OnceLock::new();

const BANNER_RULE: &str = "===============================================================================";
const BANNER_TITLE: &str = "playerstate - player state persistence";

const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Opens the log files under `<root>/log`. Logging calls made before
/// this are dropped.
pub fn init(root: &Path) -> Result<(), String> {
    if LOGGER.get().is_some() {
        return Ok(());
    }
    let log_dir = root.join("log");
    std::fs::create_dir_all(&log_dir)
        .map_err(|err| format!("log directory {} not created: {}", log_dir.display(), err))?;

    let now = Timestamp::now();
    let mut files = BTreeMap::new();
    for log_file in LogFile::ALL {
        let name = log_file.file_name();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join(name))
            .map_err(|err| format!("log {} not opened: {}", name, err))?;
        let fresh = file.metadata().map(|meta| meta.len() == 0).unwrap_or(true);
        if log_file.wants_header() && fresh {
            writeln!(
                file,
                "{BANNER_RULE}\n{BANNER_TITLE}\n{name} opened {}",
                now.banner()
            )
            .map_err(|err| format!("log {} banner not written: {}", name, err))?;
        }
        files.insert(log_file, file);
    }

    LOGGER
        .set(Mutex::new(files))
        .map_err(|_| "log system already initialized".to_string())
}

pub fn log_persistence(message: &str) {
    append(LogFile::Persistence, message);
}

pub fn log_combat(message: &str) {
    append(LogFile::Combat, message);
}

pub fn log_error(message: &str) {
    append(LogFile::Error, message);
}

fn append(log_file: LogFile, message: &str) {
    let Some(files) = LOGGER.get() else {
        return;
    };
    let Ok(mut files) = files.lock() else {
        return;
    };
    if let Some(file) = files.get_mut(&log_file) {
        let _ = writeln!(file, "{} (0): {}", Timestamp::now().line(), message);
    }
}

/// Calendar breakdown of a unix time in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Timestamp {
    year: u64,
    month: usize,
    day: u64,
    hour: u64,
    minute: u64,
    second: u64,
    weekday: usize,
}

impl Timestamp {
    fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self::from_unix(secs)
    }

    fn from_unix(secs: u64) -> Self {
        let mut days = secs / 86_400;
        let in_day = secs % 86_400;
        let weekday = ((days + 4) % 7) as usize;

        let mut year = 1970;
        loop {
            let len = if is_leap(year) { 366 } else { 365 };
            if days < len {
                break;
            }
            days -= len;
            year += 1;
        }
        let mut month = 0;
        while month < 11 && days >= month_length(year, month) {
            days -= month_length(year, month);
            month += 1;
        }

        Self {
            year,
            month,
            day: days + 1,
            hour: in_day / 3_600,
            minute: in_day % 3_600 / 60,
            second: in_day % 60,
            weekday,
        }
    }

    /// `DD.MM.YYYY HH:MM:SS`
    fn line(&self) -> String {
        format!(
            "{:02}.{:02}.{} {:02}:{:02}:{:02}",
            self.day,
            self.month + 1,
            self.year,
            self.hour,
            self.minute,
            self.second
        )
    }

    /// `Thu Feb 29 13:45:10 2024`
    fn banner(&self) -> String {
        format!(
            "{} {} {:>2} {:02}:{:02}:{:02} {}",
            WEEKDAYS[self.weekday],
            MONTHS[self.month],
            self.day,
            self.hour,
            self.minute,
            self.second,
            self.year
        )
    }
}

fn is_leap(year: u64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn month_length(year: u64, month: usize) -> u64 {
    match month {
        1 if is_leap(year) => 29,
        1 => 28,
        3 | 5 | 8 | 10 => 30,
        _ => 31,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leap_day_breakdown() {
        let stamp = Timestamp::from_unix(1_709_214_310);
        assert_eq!(stamp.line(), "29.02.2024 13:45:10");
        assert_eq!(stamp.banner(), "Thu Feb 29 13:45:10 2024");
    }

    #[test]
    fn epoch_and_year_boundary() {
        assert_eq!(Timestamp::from_unix(0).banner(), "Thu Jan  1 00:00:00 1970");
        // 2023-12-31 23:59:59 UTC
        assert_eq!(Timestamp::from_unix(1_704_067_199).line(), "31.12.2023 23:59:59");
        assert_eq!(Timestamp::from_unix(1_704_067_200).line(), "01.01.2024 00:00:00");
    }

    #[test]
    fn logging_before_init_is_silent() {
        log_persistence("dropped");
        log_combat("dropped");
        log_error("dropped");
    }
}
