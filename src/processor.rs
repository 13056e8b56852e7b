use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use filetime_creation::FileTime;
use log::{debug, error, warn};
use time::{format_description::FormatItem, macros::format_description, OffsetDateTime};
use time_tz::{OffsetDateTimeExt, TimeZone, Tz};

use crate::gpx_reader::read_track_details;
use crate::timezone::ResolveTimeZone;

/// Date-only format used in the new file name, e.g. "2014-08-23". Kept free
/// of path separators so the sanitised name stays readable everywhere.
const LOCAL_DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Upper bound on the collision-avoidance loop so a pathological directory
/// cannot spin it forever.
const MAX_RENAME_ATTEMPTS: u32 = 10_000;

/// Renames one GPX file to "<recording name> (<local date>)", where the date
/// is the recording's start rendered in the time zone of its first point.
/// Best-effort: every failure is logged and the file is left as it was.
pub fn process_file(path: &Path, resolver: &dyn ResolveTimeZone) {
    debug!("Processing {:?}", path);

    let details = match read_track_details(path) {
        Ok(details) => details,
        Err(e) => {
            error!("Skipping {:?}: {:#}", path, e);
            return;
        }
    };

    let Some(tz) = resolver.resolve(&details.latitude, &details.longitude, details.time) else {
        error!(
            "Unable to determine the time zone for {{{}, {}}} at {} ({:?})",
            details.latitude, details.longitude, details.time, path
        );
        return;
    };

    let local_date = match local_date_string(details.time, tz) {
        Ok(local_date) => local_date,
        Err(e) => {
            error!("Skipping {:?}: {:#}", path, e);
            return;
        }
    };

    debug!(
        "Time zone for {{{}, {}}} at {} is {}, so the local date is {:?}",
        details.latitude,
        details.longitude,
        details.time,
        tz.name(),
        local_date
    );

    let base_name = sanitise_file_name(&format!("{} ({})", details.name, local_date));

    let final_path = match rename_avoiding_collisions(path, &base_name) {
        Ok(final_path) => final_path,
        Err(e) => {
            error!("Unable to rename {:?}: {:#}", path, e);
            return;
        }
    };

    // The rename has already succeeded at this point, so a failure here is
    // only worth a warning.
    if let Err(e) = set_creation_time(&final_path, details.time) {
        warn!(
            "Unable to set the creation time of {:?} to {}: {:#}",
            final_path, details.time, e
        );
    }
}

/// The creation time rendered date-only in the resolved zone.
fn local_date_string(time: OffsetDateTime, tz: &Tz) -> Result<String> {
    time.to_timezone(tz)
        .format(LOCAL_DATE_FORMAT)
        .with_context(|| format!("Unable to format {} as a local date", time))
}

/// '/' cannot appear in a file name, so substitute ':'. On HFS+ the two
/// characters historically exchange roles, which keeps the displayed name
/// intact there.
pub fn sanitise_file_name(name: &str) -> String {
    name.replace('/', ":")
}

/// Moves the file to "<base_name>[ #N][.<ext>]" in its own directory, taking
/// the first N (starting at 1, where the suffix is omitted) that is free. If
/// the file already has the computed name it is left in place. Returns the
/// final path.
fn rename_avoiding_collisions(path: &Path, base_name: &str) -> Result<PathBuf> {
    let parent = path
        .parent()
        .with_context(|| format!("{:?} has no parent directory", path))?;
    let extension = path.extension().map(|e| e.to_string_lossy().into_owned());

    for index in 1..=MAX_RENAME_ATTEMPTS {
        let mut file_name = base_name.to_owned();
        if index > 1 {
            file_name.push_str(&format!(" #{index}"));
        }
        if let Some(ext) = &extension {
            file_name.push('.');
            file_name.push_str(ext);
        }

        let candidate = parent.join(&file_name);
        if candidate.as_path() == path {
            debug!("Leaving {:?} named as it is", path);
            return Ok(candidate);
        }

        // std::fs::rename clobbers an existing destination on most platforms,
        // so the existence check has to come first.
        if candidate
            .try_exists()
            .with_context(|| format!("Unable to check for an existing {:?}", candidate))?
        {
            continue;
        }

        debug!("Proposed new file name: {:?}", file_name);
        fs::rename(path, &candidate)
            .with_context(|| format!("Unable to move {:?} to {:?}", path, candidate))?;
        return Ok(candidate);
    }

    bail!(
        "No free name found for {:?} after {} attempts",
        path,
        MAX_RENAME_ATTEMPTS
    )
}

/// Stamps the file's creation-time attribute with the recording start time.
/// Not every filesystem supports this; the caller treats failure as benign.
fn set_creation_time(path: &Path, time: OffsetDateTime) -> Result<()> {
    let ctime = FileTime::from_unix_time(time.unix_timestamp(), time.nanosecond());
    filetime_creation::set_file_ctime(path, ctime)?;
    Ok(())
}
