//! DASH manifest handling.
//!
//! The manifest is only consulted for download URLs: each `Representation`
//! maps an itag to a base URL, which is preferred over the adaptive-format
//! URL for the same itag when refreshing metadata.

use std::collections::HashMap;
use std::str::FromStr;

use quick_xml::{events::Event, Reader};

fn get_attr<T>(e: &quick_xml::events::BytesStart, attr: &str) -> Option<T>
where
    T: FromStr,
{
    e.try_get_attribute(attr)
        .ok()?
        .and_then(|a| std::str::from_utf8(&a.value).ok()?.parse().ok())
}

/// Extract itag → URL-template pairs from a DASH manifest. Base URLs end in
/// a trailing slash, so the sequence number rides a path segment.
pub fn urls_from_manifest(manifest: &str) -> Result<HashMap<i64, String>, quick_xml::Error> {
    let mut reader = Reader::from_str(manifest);
    reader.trim_text(true);

    let mut urls = HashMap::new();
    let mut cur_itag: Option<i64> = None;
    let mut in_base_url = false;

    loop {
        match reader.read_event() {
            Err(e) => return Err(e),
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"Representation" => cur_itag = get_attr(&e, "id"),
                b"BaseURL" => in_base_url = true,
                _ => (),
            },
            Ok(Event::Text(e)) => {
                if in_base_url {
                    if let (Some(itag), Some(base)) =
                        (cur_itag, e.unescape().ok().map(|u| u.into_owned()))
                    {
                        urls.insert(itag, format!("{}sq/%d", base));
                    }
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"BaseURL" => in_base_url = false,
                b"Representation" => cur_itag = None,
                _ => (),
            },
            _ => (),
        }
    }

    Ok(urls)
}

#[cfg(test)]
mod tests {
    const MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:DASH:schema:MPD:2011" type="dynamic">
  <Period start="PT0S">
    <AdaptationSet mimeType="audio/mp4">
      <Representation id="140" codecs="mp4a.40.2" bandwidth="144000">
        <BaseURL>https://r4---sn-example.googlevideo.com/videoplayback/id/140/</BaseURL>
      </Representation>
    </AdaptationSet>
    <AdaptationSet mimeType="video/mp4">
      <Representation id="137" codecs="avc1.64002a" width="1920" height="1080" bandwidth="4400000">
        <BaseURL>https://r4---sn-example.googlevideo.com/videoplayback/id/137/</BaseURL>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;

    #[test]
    fn extracts_itag_urls() {
        let urls = super::urls_from_manifest(MANIFEST).expect("could not parse manifest");

        assert_eq!(urls.len(), 2);
        assert_eq!(
            urls[&140],
            "https://r4---sn-example.googlevideo.com/videoplayback/id/140/sq/%d"
        );
        assert_eq!(
            urls[&137],
            "https://r4---sn-example.googlevideo.com/videoplayback/id/137/sq/%d"
        );
    }

    #[test]
    fn empty_manifest_yields_no_urls() {
        let urls = super::urls_from_manifest("<MPD></MPD>").expect("could not parse manifest");
        assert!(urls.is_empty());
    }
}
