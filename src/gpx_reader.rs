use std::{borrow::Cow, path::Path};

use anyhow::{bail, Context, Result};
use log::{debug, warn};
use logging_timer::time;
use quick_xml::{
    events::{BytesStart, Event},
    Reader,
};
use time::{format_description::well_known::Rfc3339, OffsetDateTime, UtcOffset};

/// The fields the renamer needs from a GPX file. Everything else in the
/// document is skipped over without being modelled.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackDetails {
    /// `metadata > time`, normalised to UTC.
    pub time: OffsetDateTime,
    /// `trk > name`.
    pub name: String,
    /// The `lat` attribute of the first `trkpt`, verbatim.
    pub latitude: String,
    /// The `lon` attribute of the first `trkpt`, verbatim.
    pub longitude: String,
}

/// Reads a GPX file and extracts the creation time, recording name and the
/// coordinates of the first track point. Only the first occurrence of each
/// element is consulted; an empty value is treated the same as a missing one.
#[time]
pub fn read_track_details<P: AsRef<Path>>(input_file: P) -> Result<TrackDetails> {
    let input_file = input_file.as_ref();
    debug!("Reading GPX file {:?}", input_file);
    let contents = std::fs::read(input_file)
        .with_context(|| format!("Unable to read contents of {:?}", input_file))?;
    read_track_details_from_slice(&contents)
}

pub fn read_track_details_from_slice(data: &[u8]) -> Result<TrackDetails> {
    let mut xml_reader = Reader::from_reader(data);

    loop {
        match xml_reader.read_event() {
            Ok(Event::Start(e)) => {
                if !e.name().as_ref().eq_ignore_ascii_case(b"gpx") {
                    warn!(
                        "Root element is not a 'gpx' node, but {:?}",
                        xml_reader.bytes_to_cow(e.name().as_ref())?
                    );
                }
                let root_name = e.name().as_ref().to_vec();
                return parse_document(&root_name, &mut xml_reader);
            }
            Ok(Event::Eof) => bail!("Document contains no root element"),
            Err(e) => bail!("Error at position {}: {:?}", xml_reader.error_position(), e),
            _ => (),
        }
    }
}

fn parse_document(root_name: &[u8], xml_reader: &mut Reader<&[u8]>) -> Result<TrackDetails> {
    let mut time_text: Option<String> = None;
    let mut track: Option<(Option<String>, Option<TrackPointAttributes>)> = None;

    loop {
        match xml_reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"metadata" if time_text.is_none() => {
                    time_text = parse_metadata(xml_reader)?;
                }
                b"trk" if track.is_none() => {
                    track = Some(parse_track(xml_reader)?);
                }
                _ => {
                    xml_reader.read_to_end(e.name())?;
                }
            },
            Ok(Event::End(e)) if e.name().as_ref() == root_name => break,
            Ok(Event::Eof) => bail!("Unexpected EOF before the closing root tag"),
            Err(e) => bail!("Error at position {}: {:?}", xml_reader.error_position(), e),
            _ => (),
        }
    }

    let time_text = time_text
        .filter(|t| !t.is_empty())
        .context("No creation time found (metadata > time)")?;
    let time = OffsetDateTime::parse(&time_text, &Rfc3339)
        .with_context(|| format!("Unable to parse GPX creation time {:?}", time_text))?
        .to_offset(UtcOffset::UTC);

    let (name, point) = track.context("No 'trk' element found")?;
    let name = name
        .filter(|n| !n.is_empty())
        .context("No recording name found (trk > name)")?;
    let point = point.context("No track point found (trk > trkseg > trkpt)")?;
    let latitude = point
        .latitude
        .filter(|l| !l.is_empty())
        .context("No latitude found on the first track point")?;
    let longitude = point
        .longitude
        .filter(|l| !l.is_empty())
        .context("No longitude found on the first track point")?;

    Ok(TrackDetails {
        time,
        name,
        latitude,
        longitude,
    })
}

/// Returns the text of the first `time` element under `metadata`.
fn parse_metadata(xml_reader: &mut Reader<&[u8]>) -> Result<Option<String>> {
    let mut time = None;

    loop {
        match xml_reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"time" if time.is_none() => {
                    time = Some(xml_reader.read_text(e.name())?.into_owned());
                }
                _ => {
                    xml_reader.read_to_end(e.name())?;
                }
            },
            Ok(Event::End(e)) if e.name().as_ref() == b"metadata" => return Ok(time),
            Ok(Event::Eof) => bail!("Unexpected EOF inside 'metadata'"),
            Err(e) => bail!("Error at position {}: {:?}", xml_reader.error_position(), e),
            _ => (),
        }
    }
}

fn parse_track(
    xml_reader: &mut Reader<&[u8]>,
) -> Result<(Option<String>, Option<TrackPointAttributes>)> {
    let mut name = None;
    let mut point = None;

    loop {
        match xml_reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"name" if name.is_none() => {
                    name = Some(xml_reader.read_text(e.name())?.into_owned());
                }
                b"trkseg" if point.is_none() => {
                    point = parse_track_segment(xml_reader)?;
                }
                _ => {
                    xml_reader.read_to_end(e.name())?;
                }
            },
            Ok(Event::End(e)) if e.name().as_ref() == b"trk" => return Ok((name, point)),
            Ok(Event::Eof) => bail!("Unexpected EOF inside 'trk'"),
            Err(e) => bail!("Error at position {}: {:?}", xml_reader.error_position(), e),
            _ => (),
        }
    }
}

/// Returns the attributes of the first `trkpt` in the segment. Subsequent
/// points are not examined, even on tracks long enough to cross a zone.
fn parse_track_segment(xml_reader: &mut Reader<&[u8]>) -> Result<Option<TrackPointAttributes>> {
    let mut point = None;

    loop {
        match xml_reader.read_event() {
            Ok(Event::Start(e)) => {
                if e.name().as_ref() == b"trkpt" && point.is_none() {
                    point = Some(parse_track_point_attributes(&e, xml_reader)?);
                }
                xml_reader.read_to_end(e.name())?;
            }
            Ok(Event::Empty(e)) => {
                if e.name().as_ref() == b"trkpt" && point.is_none() {
                    point = Some(parse_track_point_attributes(&e, xml_reader)?);
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"trkseg" => return Ok(point),
            Ok(Event::Eof) => bail!("Unexpected EOF inside 'trkseg'"),
            Err(e) => bail!("Error at position {}: {:?}", xml_reader.error_position(), e),
            _ => (),
        }
    }
}

#[derive(Debug, Default)]
struct TrackPointAttributes {
    latitude: Option<String>,
    longitude: Option<String>,
}

fn parse_track_point_attributes<R>(
    tag: &BytesStart<'_>,
    xml_reader: &Reader<R>,
) -> Result<TrackPointAttributes> {
    let mut attributes = TrackPointAttributes::default();

    for attr in tag.attributes() {
        let attr = attr?;
        match attr.key.into_inner() {
            b"lat" => attributes.latitude = Some(xml_reader.cow_to_string(attr.value)?),
            b"lon" => attributes.longitude = Some(xml_reader.cow_to_string(attr.value)?),
            _ => (),
        }
    }

    Ok(attributes)
}

pub(crate) trait XmlReaderConversions {
    fn bytes_to_cow<'a, 'b>(&'a self, bytes: &'b [u8]) -> Result<Cow<'b, str>>;
    fn cow_to_string(&self, bytes: Cow<'_, [u8]>) -> Result<String>;
}

impl<R> XmlReaderConversions for Reader<R> {
    #[inline]
    fn bytes_to_cow<'a, 'b>(&'a self, bytes: &'b [u8]) -> Result<Cow<'b, str>> {
        Ok(self.decoder().decode(bytes)?)
    }

    #[inline]
    fn cow_to_string(&self, bytes: Cow<'_, [u8]>) -> Result<String> {
        // Ensure everything goes through decode().
        match bytes {
            Cow::Borrowed(slice) => Ok(self.bytes_to_cow(slice)?.into()),
            Cow::Owned(vec) => Ok(self.bytes_to_cow(&vec)?.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const RIDE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx creator="strava.com iPhone" version="1.1" xmlns="http://www.topografix.com/GPX/1/1">
  <metadata>
    <time>2014-08-23T15:42:12Z</time>
  </metadata>
  <trk>
    <name>Sal&apos;s Branch Trail</name>
    <trkseg>
      <trkpt lat="35.8808490" lon="-78.7584300">
        <ele>114.0</ele>
        <time>2014-08-23T15:42:12Z</time>
      </trkpt>
      <trkpt lat="35.8808000" lon="-78.7584000"/>
    </trkseg>
  </trk>
</gpx>"#;

    #[test]
    fn extracts_all_fields_from_the_first_point() {
        let details = read_track_details_from_slice(RIDE.as_bytes()).unwrap();
        assert_eq!(details.time, datetime!(2014-08-23 15:42:12 UTC));
        assert_eq!(details.name, "Sal's Branch Trail");
        assert_eq!(details.latitude, "35.8808490");
        assert_eq!(details.longitude, "-78.7584300");
    }

    #[test]
    fn creation_time_is_normalised_to_utc() {
        let doc = RIDE.replacen("2014-08-23T15:42:12Z", "2014-08-23T17:42:12+02:00", 1);
        let details = read_track_details_from_slice(doc.as_bytes()).unwrap();
        assert_eq!(details.time, datetime!(2014-08-23 15:42:12 UTC));
        assert_eq!(details.time.offset(), UtcOffset::UTC);
    }

    #[test]
    fn non_gpx_root_still_parses() {
        let doc = RIDE.replace("<gpx ", "<track ").replace("</gpx>", "</track>");
        let details = read_track_details_from_slice(doc.as_bytes()).unwrap();
        assert_eq!(details.name, "Sal's Branch Trail");
    }

    #[test]
    fn self_closing_track_point_is_accepted() {
        let doc = RIDE.replace(
            r#"<trkpt lat="35.8808490" lon="-78.7584300">
        <ele>114.0</ele>
        <time>2014-08-23T15:42:12Z</time>
      </trkpt>"#,
            r#"<trkpt lat="35.8808490" lon="-78.7584300"/>"#,
        );
        let details = read_track_details_from_slice(doc.as_bytes()).unwrap();
        assert_eq!(details.latitude, "35.8808490");
    }

    #[test]
    fn only_the_first_track_is_consulted() {
        let doc = RIDE.replace(
            "</gpx>",
            "<trk><name>Second</name><trkseg><trkpt lat=\"1\" lon=\"2\"/></trkseg></trk></gpx>",
        );
        let details = read_track_details_from_slice(doc.as_bytes()).unwrap();
        assert_eq!(details.name, "Sal's Branch Trail");
        assert_eq!(details.latitude, "35.8808490");
    }

    #[test]
    fn missing_creation_time_fails() {
        let doc = RIDE.replace("<time>2014-08-23T15:42:12Z</time>\n  </metadata>", "</metadata>");
        let err = read_track_details_from_slice(doc.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("No creation time"));
    }

    #[test]
    fn empty_creation_time_fails_like_a_missing_one() {
        let doc = RIDE.replacen("2014-08-23T15:42:12Z", "", 1);
        let err = read_track_details_from_slice(doc.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("No creation time"));
    }

    #[test]
    fn unparsable_creation_time_fails() {
        let doc = RIDE.replacen("2014-08-23T15:42:12Z", "yesterday teatime", 1);
        let err = read_track_details_from_slice(doc.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("Unable to parse GPX creation time"));
    }

    #[test]
    fn missing_recording_name_fails() {
        let doc = RIDE.replace("<name>Sal&apos;s Branch Trail</name>", "");
        let err = read_track_details_from_slice(doc.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("No recording name"));
    }

    #[test]
    fn empty_recording_name_fails_like_a_missing_one() {
        let doc = RIDE.replace("Sal&apos;s Branch Trail", "");
        let err = read_track_details_from_slice(doc.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("No recording name"));
    }

    #[test]
    fn missing_track_point_fails() {
        let doc = RIDE.replace(
            r#"<trkpt lat="35.8808490" lon="-78.7584300">
        <ele>114.0</ele>
        <time>2014-08-23T15:42:12Z</time>
      </trkpt>
      <trkpt lat="35.8808000" lon="-78.7584000"/>"#,
            "",
        );
        let err = read_track_details_from_slice(doc.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("No track point"));
    }

    #[test]
    fn missing_latitude_fails() {
        let doc = RIDE.replacen(r#"lat="35.8808490" "#, "", 1);
        let err = read_track_details_from_slice(doc.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("No latitude"));
    }

    #[test]
    fn empty_longitude_fails_like_a_missing_one() {
        let doc = RIDE.replacen(r#"lon="-78.7584300""#, r#"lon="""#, 1);
        let err = read_track_details_from_slice(doc.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("No longitude"));
    }

    #[test]
    fn truncated_document_fails() {
        let err = read_track_details_from_slice(b"<gpx><metadata>").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("EOF") || msg.contains("Error at position"));
    }
}
