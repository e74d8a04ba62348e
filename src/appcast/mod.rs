//! Sparkle appcast generation and merging.
//!
//! The appcast is the durable, append-only list of release entries consumed
//! by the in-app update checker. This module parses the deployed document to
//! recover published versions, renders a new `<item>` for the release being
//! produced, and merges it into the document as the last child of the single
//! `<channel>` element. Prior entries are never mutated or removed.
//!
//! Documents are built through the quick-xml event writer rather than string
//! templating, so titles and URLs are escaped structurally. Release notes
//! are embedded verbatim inside a CDATA block per the Sparkle format.

pub mod version;

use crate::error::{Error, Result};
use chrono::Utc;
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use regex::Regex;
use semver::Version;
use std::sync::OnceLock;
use version::{BumpPolicy, VersionDecision, VersionOverrides};

/// Sparkle vendor namespace carried on `<rss>` and the versioned elements.
pub const SPARKLE_XMLNS: &str = "http://www.andymatuschak.org/xml-namespaces/sparkle";
const DC_XMLNS: &str = "http://purl.org/dc/elements/1.1/";

/// One release descriptor, rendered as an `<item>` element.
#[derive(Debug, Clone)]
pub struct FeedEntry {
    /// Entry title shown in the update dialog
    pub title: String,
    /// Website link for the release
    pub link: String,
    /// Monotonic build number (`sparkle:version`)
    pub build: u64,
    /// Marketing version (`sparkle:shortVersionString`)
    pub marketing: String,
    /// Release notes, embedded verbatim in a CDATA block
    pub release_notes: String,
    /// Publication timestamp, RFC 2822
    pub pub_date: String,
    /// Enclosure URL of the artifact
    pub download_url: String,
    /// Detached-signature attributes for the enclosure
    /// (`sparkle:edSignature`, `length`)
    pub signature_attributes: Vec<(String, String)>,
    /// `sparkle:minimumSystemVersion`
    pub minimum_system_version: String,
}

impl FeedEntry {
    /// Assemble an entry for `decision`, stamped with the current time.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        decision: &VersionDecision,
        title: &str,
        link: &str,
        release_notes: &str,
        download_url: &str,
        signature_fragment: &str,
        minimum_system_version: &str,
    ) -> Result<Self> {
        if release_notes.contains("]]>") {
            return Err(Error::validation(
                "release notes must not contain the CDATA terminator ']]>'",
            ));
        }

        Ok(Self {
            title: title.to_string(),
            link: link.to_string(),
            build: decision.build,
            marketing: decision.marketing.to_string(),
            release_notes: release_notes.to_string(),
            pub_date: Utc::now().to_rfc2822(),
            download_url: download_url.to_string(),
            signature_attributes: parse_signature_fragment(signature_fragment)?,
            minimum_system_version: minimum_system_version.to_string(),
        })
    }
}

/// Parse the `key="value"` attribute fragment emitted by Sparkle's
/// `sign_update` tool (typically `sparkle:edSignature="…" length="…"`).
pub fn parse_signature_fragment(fragment: &str) -> Result<Vec<(String, String)>> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r#"([A-Za-z][\w:-]*)="([^"]*)""#).expect("valid regex"));

    let attributes: Vec<(String, String)> = pattern
        .captures_iter(fragment)
        .map(|c| (c[1].to_string(), c[2].to_string()))
        .collect();

    if attributes.is_empty() {
        return Err(Error::validation(format!(
            "signature fragment contains no attributes: {}",
            fragment.trim()
        )));
    }

    Ok(attributes)
}

/// Versions recovered from every entry of a deployed appcast.
#[derive(Debug, Default)]
pub struct PublishedVersions {
    pub marketing: Vec<Version>,
    pub builds: Vec<u64>,
}

impl PublishedVersions {
    pub fn is_empty(&self) -> bool {
        self.marketing.is_empty() && self.builds.is_empty()
    }
}

/// Scan a deployed appcast for all `sparkle:shortVersionString` and
/// `sparkle:version` values. A malformed document is fatal.
pub fn scan_versions(deployed_xml: &str) -> Result<PublishedVersions> {
    let mut reader = Reader::from_str(deployed_xml);
    let mut published = PublishedVersions::default();

    // Prefix bound to the Sparkle namespace. Resolution is document-wide,
    // not scoped: feeds declare it once on <rss>, conventionally as
    // `sparkle`, but any prefix bound to the namespace is honored.
    let mut sparkle_prefix: Vec<u8> = b"sparkle".to_vec();

    // Tracks which version element we are inside, if any.
    enum Field {
        Marketing,
        Build,
    }
    let mut current: Option<Field> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                for attribute in e.attributes().flatten() {
                    if let Some(prefix) = attribute.key.as_ref().strip_prefix(b"xmlns:") {
                        if attribute.value.as_ref() == SPARKLE_XMLNS.as_bytes() {
                            sparkle_prefix = prefix.to_vec();
                        }
                    }
                }

                let name = e.name();
                let local = name
                    .as_ref()
                    .strip_prefix(sparkle_prefix.as_slice())
                    .and_then(|rest| rest.strip_prefix(b":"));
                current = match local {
                    Some(b"shortVersionString") => Some(Field::Marketing),
                    Some(b"version") => Some(Field::Build),
                    _ => None,
                };
            }
            Ok(Event::Text(t)) => {
                if let Some(field) = &current {
                    let text = t
                        .decode()
                        .map_err(|e| Error::FeedParse(e.to_string()))?
                        .trim()
                        .to_string();
                    match field {
                        Field::Marketing => published
                            .marketing
                            .push(Version::parse(&text).map_err(|e| {
                                Error::FeedParse(format!("bad marketing version {text:?}: {e}"))
                            })?),
                        Field::Build => published.builds.push(text.parse::<u64>().map_err(
                            |e| Error::FeedParse(format!("bad build number {text:?}: {e}")),
                        )?),
                    }
                }
            }
            Ok(Event::End(_)) => current = None,
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(Error::FeedParse(e.to_string())),
        }
    }

    Ok(published)
}

/// Derive the next (marketing version, build number) pair from the deployed
/// appcast, the configured bump policy, and any explicit overrides.
///
/// An absent document and a document with zero entries are the same valid
/// empty state: both yield the bootstrap pair.
pub fn compute_next(
    deployed_xml: Option<&str>,
    policy: BumpPolicy,
    overrides: &VersionOverrides,
) -> Result<VersionDecision> {
    let published = deployed_xml.map(scan_versions).transpose()?;

    let axes = match &published {
        Some(p) if !p.is_empty() => Some((p.marketing.as_slice(), p.builds.as_slice())),
        _ => None,
    };

    version::compute_next(axes, policy, overrides)
}

/// Merge `entry` into the deployed appcast, or synthesize a fresh document
/// when none has been published yet.
///
/// The new item becomes the last child of the single `<channel>` element;
/// all prior entries are carried over unchanged. No deduplication is
/// performed: merging the same entry twice produces two identical items, so
/// callers must not retry a successful merge+upload.
pub fn merge(deployed_xml: Option<&str>, entry: &FeedEntry) -> Result<String> {
    match deployed_xml {
        Some(existing) => append_to_existing(existing, entry),
        None => {
            log::debug!("Creating a new appcast file...");
            new_document(entry)
        }
    }
}

fn append_to_existing(existing: &str, entry: &FeedEntry) -> Result<String> {
    log::debug!("Appending the new item to the existing appcast file...");

    let mut reader = Reader::from_str(existing);
    let mut writer = Writer::new(Vec::new());
    let mut channels_seen = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::End(e)) if e.name().as_ref() == b"channel" => {
                channels_seen += 1;
                write_item(&mut writer, entry)?;
                writer.write_event(Event::End(e))?;
            }
            Ok(Event::Eof) => break,
            Ok(event) => writer.write_event(event)?,
            Err(e) => return Err(Error::FeedParse(e.to_string())),
        }
    }

    if channels_seen != 1 {
        return Err(Error::FeedParse(format!(
            "expected exactly one channel element, found {channels_seen}"
        )));
    }

    Ok(String::from_utf8(writer.into_inner())
        .map_err(|e| Error::FeedParse(format!("merged appcast is not UTF-8: {e}")))?)
}

fn new_document(entry: &FeedEntry) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b'\t', 1);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    let mut rss = BytesStart::new("rss");
    rss.push_attribute(("version", "2.0"));
    rss.push_attribute(("xmlns:sparkle", SPARKLE_XMLNS));
    rss.push_attribute(("xmlns:dc", DC_XMLNS));
    writer.write_event(Event::Start(rss))?;

    writer.write_event(Event::Start(BytesStart::new("channel")))?;
    write_text_element(&mut writer, "title", "Changelog")?;
    write_text_element(
        &mut writer,
        "description",
        "Most recent changes with links to updates.",
    )?;
    write_text_element(&mut writer, "language", "en")?;
    write_item(&mut writer, entry)?;
    writer.write_event(Event::End(BytesEnd::new("channel")))?;

    writer.write_event(Event::End(BytesEnd::new("rss")))?;

    Ok(String::from_utf8(writer.into_inner())
        .map_err(|e| Error::FeedParse(format!("generated appcast is not UTF-8: {e}")))?)
}

fn write_text_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    text: &str,
) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn write_item<W: std::io::Write>(writer: &mut Writer<W>, entry: &FeedEntry) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new("item")))?;

    write_text_element(writer, "title", &entry.title)?;
    write_text_element(writer, "link", &entry.link)?;
    write_text_element(writer, "sparkle:version", &entry.build.to_string())?;
    write_text_element(writer, "sparkle:shortVersionString", &entry.marketing)?;

    writer.write_event(Event::Start(BytesStart::new("description")))?;
    writer.write_event(Event::CData(BytesCData::new(entry.release_notes.as_str())))?;
    writer.write_event(Event::End(BytesEnd::new("description")))?;

    write_text_element(writer, "pubDate", &entry.pub_date)?;

    let mut enclosure = BytesStart::new("enclosure");
    enclosure.push_attribute(("url", entry.download_url.as_str()));
    enclosure.push_attribute(("type", "application/octet-stream"));
    for (key, value) in &entry.signature_attributes {
        enclosure.push_attribute((key.as_str(), value.as_str()));
    }
    writer.write_event(Event::Empty(enclosure))?;

    write_text_element(
        writer,
        "sparkle:minimumSystemVersion",
        &entry.minimum_system_version,
    )?;

    writer.write_event(Event::End(BytesEnd::new("item")))?;
    Ok(())
}
