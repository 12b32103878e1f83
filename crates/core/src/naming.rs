use chrono::{DateTime, Local, NaiveDateTime, TimeZone};

pub const FILENAME_PREFIX: &str = "scoop_backup_";
pub const FILENAME_SUFFIX: &str = ".json";
const FILENAME_TIME_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";
const LABEL_TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// `scoop_backup_YYYY-MM-DD-HH-mm-ss.json`. Two backups taken within the same
/// second get the same name.
pub fn backup_filename<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{FILENAME_PREFIX}{}{FILENAME_SUFFIX}",
        now.format(FILENAME_TIME_FORMAT)
    )
}

pub fn backup_label<Tz: TimeZone>(family_marker: &str, now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{family_marker} - {}", now.format(LABEL_TIME_FORMAT))
}

/// Local wall-clock time embedded in a backup filename.
pub fn parse_backup_filename(filename: &str) -> Option<NaiveDateTime> {
    let stamp = filename
        .strip_prefix(FILENAME_PREFIX)?
        .strip_suffix(FILENAME_SUFFIX)?;
    NaiveDateTime::parse_from_str(stamp, FILENAME_TIME_FORMAT).ok()
}

pub fn now_local() -> DateTime<Local> {
    Local::now()
}
