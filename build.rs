use time::format_description::{self, BorrowedFormatItem};
use time::OffsetDateTime;

/// Build timestamp; `SOURCE_DATE_EPOCH` pins it for reproducible builds.
fn build_instant() -> OffsetDateTime {
    std::env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|secs| secs.trim().parse::<i64>().ok())
        .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
        .unwrap_or_else(OffsetDateTime::now_utc)
}

fn stamp(at: OffsetDateTime, format: &[BorrowedFormatItem<'_>]) -> String {
    at.format(format).unwrap_or_else(|_| "unknown".to_string())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");

    let date_fmt = format_description::parse_borrowed::<2>("[month repr:short] [day padding:space] [year]")
        .expect("valid date format");
    let time_fmt = format_description::parse_borrowed::<2>("[hour]:[minute]:[second]")
        .expect("valid time format");

    let at = build_instant();
    println!("cargo:rustc-env=RAYCOMPACT_BUILD_DATE={}", stamp(at, &date_fmt));
    println!("cargo:rustc-env=RAYCOMPACT_BUILD_TIME={}", stamp(at, &time_fmt));
}
