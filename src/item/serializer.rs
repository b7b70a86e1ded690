//! Lossless XML codec for [`Item`].
//!
//! The wire format is a single Atom `<entry>` carrying the standard Atom
//! elements plus four extension namespaces for everything Atom has no slot
//! for (archive status, content hash, comment endpoints, enclosure
//! durations, custom properties).
//!
//! Omission is the compression scheme: an element or attribute is only
//! written when its value differs from the field default, so a freshly
//! constructed [`Item`] serializes to a bare `<entry/>` and absent elements
//! deserialize back to the defaults. Dates are RFC 3339 at second
//! precision.
//!
//! Reading is namespace-aware and tolerant: recognized `(namespace,
//! local-name)` pairs are dispatched wherever they appear in the stream,
//! unknown elements are skipped, and unparseable numbers or dates inside
//! recognized elements degrade to the field default. Only malformed XML is
//! an error.

use std::io::{BufRead, Cursor, Write};

use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::{NsReader, Writer};
use thiserror::Error;

use super::{Category, Enclosure, Item, Person, Status};

const NS_ATOM: &str = "http://www.w3.org/2005/Atom";
const NS_KFEED: &str = "http://akregator.kde.org/kfeed#";
const NS_COMMENT: &str = "http://wellformedweb.org/CommentAPI/";
const NS_SLASH: &str = "http://purl.org/rss/1.0/modules/slash/";
const NS_ITUNES: &str = "http://www.itunes.com/dtds/podcast-1.0.dtd";

/// Errors that can occur while encoding or decoding items.
#[derive(Debug, Error)]
pub enum SerializerError {
    /// XML parsing failed. The input is not a well-formed document.
    #[error("XML parse error: {0}")]
    Malformed(String),

    /// Writing the XML stream failed.
    #[error("XML write error: {0}")]
    Write(String),
}

fn xml_err(err: impl std::fmt::Display) -> SerializerError {
    SerializerError::Malformed(err.to_string())
}

fn write_err(err: impl std::fmt::Display) -> SerializerError {
    SerializerError::Write(err.to_string())
}

// ============================================================================
// Writing
// ============================================================================

/// Encodes a single item as a standalone Atom `<entry>` document.
///
/// The output is UTF-8 XML with all extension namespaces declared on the
/// root element. Fields at their default value produce no output, which is
/// what makes [`deserialize`] of the result structurally equal to the
/// input (sub-second date precision is not preserved; the wire format is
/// RFC 3339 at whole seconds).
///
/// # Arguments
///
/// * `item` - The item to encode
///
/// # Returns
///
/// The serialized document bytes.
///
/// # Errors
///
/// Returns [`SerializerError::Write`] if the XML writer fails, which for
/// an in-memory buffer does not happen in practice.
///
/// # Examples
///
/// ```
/// use feedvault::item::{deserialize, serialize, Item, Status};
///
/// let mut item = Item::new();
/// item.set_id("urn:example:1");
/// item.set_title("Hello");
/// item.set_status(Status::UNREAD);
///
/// let bytes = serialize(&item).unwrap();
/// let back = deserialize(&bytes).unwrap();
/// assert_eq!(back, item);
/// ```
pub fn serialize(item: &Item) -> Result<Vec<u8>, SerializerError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(write_err)?;
    write_entry(&mut writer, item, true)?;
    Ok(writer.into_inner().into_inner())
}

/// Encodes a whole archive as one Atom `<feed>` document.
///
/// Namespaces are declared once on the feed root; the entries are written
/// by the same encoder as [`serialize`]. An empty iterator yields a feed
/// with no entries.
pub fn write_feed<'a, I>(items: I) -> Result<Vec<u8>, SerializerError>
where
    I: IntoIterator<Item = &'a Item>,
{
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(write_err)?;

    let mut feed = BytesStart::new("feed");
    declare_namespaces(&mut feed);
    writer.write_event(Event::Start(feed)).map_err(write_err)?;

    for item in items {
        write_entry(&mut writer, item, false)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("feed")))
        .map_err(write_err)?;
    Ok(writer.into_inner().into_inner())
}

fn declare_namespaces(el: &mut BytesStart<'_>) {
    el.push_attribute(("xmlns", NS_ATOM));
    el.push_attribute(("xmlns:kfeed", NS_KFEED));
    el.push_attribute(("xmlns:comment", NS_COMMENT));
    el.push_attribute(("xmlns:slash", NS_SLASH));
    el.push_attribute(("xmlns:itunes", NS_ITUNES));
}

/// Writes one `<entry>` element into an open document.
fn write_entry<W: Write>(
    writer: &mut Writer<W>,
    item: &Item,
    declare: bool,
) -> Result<(), SerializerError> {
    let mut entry = BytesStart::new("entry");
    if declare {
        declare_namespaces(&mut entry);
    }
    writer.write_event(Event::Start(entry)).map_err(write_err)?;

    if !item.title().is_empty() {
        write_text_element(writer, "title", &[("type", "html")], item.title())?;
    }
    if !item.description().is_empty() {
        write_text_element(writer, "summary", &[("type", "html")], item.description())?;
    }
    // content() falls back to description(), so an unset content never
    // produces a redundant element here.
    if item.content() != item.description() {
        write_text_element(writer, "content", &[("type", "html")], item.content())?;
    }
    if !item.link().is_empty() {
        let mut link = BytesStart::new("link");
        link.push_attribute(("rel", "alternate"));
        link.push_attribute(("href", item.link()));
        writer.write_event(Event::Empty(link)).map_err(write_err)?;
    }
    if !item.language().is_empty() {
        write_text_element(writer, "language", &[], item.language())?;
    }
    if !item.id().is_empty() {
        write_text_element(writer, "id", &[], item.id())?;
    }
    if let Some(published) = item.date_published() {
        let stamp = published.to_rfc3339_opts(SecondsFormat::Secs, true);
        write_text_element(writer, "published", &[], &stamp)?;
    }
    // date_updated() falls back to date_published(); only a genuinely
    // different updated date earns its own element.
    if let Some(updated) = item.date_updated() {
        if item.date_published() != Some(updated) {
            let stamp = updated.to_rfc3339_opts(SecondsFormat::Secs, true);
            write_text_element(writer, "updated", &[], &stamp)?;
        }
    }
    if !item.comments_feed().is_empty() {
        write_text_element(writer, "comment:commentRss", &[], item.comments_feed())?;
    }
    if !item.comment_post_uri().is_empty() {
        write_text_element(writer, "comment:comment", &[], item.comment_post_uri())?;
    }
    if item.comments_count() != -1 {
        let count = item.comments_count().to_string();
        write_text_element(writer, "slash:comments", &[], &count)?;
    }
    if !item.comments_link().is_empty() {
        write_text_element(writer, "kfeed:commentsLink", &[], item.comments_link())?;
    }

    for category in item.categories() {
        let mut el = BytesStart::new("category");
        if !category.term.is_empty() {
            el.push_attribute(("term", category.term.as_str()));
        }
        if !category.scheme.is_empty() {
            el.push_attribute(("scheme", category.scheme.as_str()));
        }
        if !category.label.is_empty() {
            el.push_attribute(("label", category.label.as_str()));
        }
        writer.write_event(Event::Empty(el)).map_err(write_err)?;
    }

    for author in item.authors() {
        writer
            .write_event(Event::Start(BytesStart::new("author")))
            .map_err(write_err)?;
        if !author.name.is_empty() {
            write_text_element(writer, "name", &[], &author.name)?;
        }
        if !author.uri.is_empty() {
            write_text_element(writer, "uri", &[], &author.uri)?;
        }
        if !author.email.is_empty() {
            write_text_element(writer, "email", &[], &author.email)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("author")))
            .map_err(write_err)?;
    }

    for enclosure in item.enclosures() {
        let length = enclosure.length.to_string();
        let duration = enclosure.duration.to_string();
        let mut el = BytesStart::new("link");
        el.push_attribute(("rel", "enclosure"));
        if !enclosure.url.is_empty() {
            el.push_attribute(("href", enclosure.url.as_str()));
        }
        if !enclosure.title.is_empty() {
            el.push_attribute(("title", enclosure.title.as_str()));
        }
        // length is the one attribute written even at zero; readers use it
        // to tell a declared-empty enclosure from an unsized one.
        el.push_attribute(("length", length.as_str()));
        if !enclosure.mime_type.is_empty() {
            el.push_attribute(("type", enclosure.mime_type.as_str()));
        }
        if enclosure.duration != 0 {
            el.push_attribute(("itunes:duration", duration.as_str()));
        }
        writer.write_event(Event::Empty(el)).map_err(write_err)?;
    }

    if item.status() != Status::READ {
        let bits = item.status().bits().to_string();
        write_text_element(writer, "kfeed:status", &[], &bits)?;
    }
    if item.hash() != 0 {
        let hash = item.hash().to_string();
        write_text_element(writer, "kfeed:hash", &[], &hash)?;
    }
    if item.id_is_hash() {
        write_text_element(writer, "kfeed:idIsHash", &[], "true")?;
    }
    if item.source_feed_id() != -1 {
        let source = item.source_feed_id().to_string();
        write_text_element(writer, "kfeed:sourceFeedId", &[], &source)?;
    }

    for (key, value) in item.custom_properties() {
        writer
            .write_event(Event::Start(BytesStart::new("kfeed:customProperty")))
            .map_err(write_err)?;
        write_text_element(writer, "kfeed:key", &[], key)?;
        if !value.is_empty() {
            write_text_element(writer, "kfeed:value", &[], value)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("kfeed:customProperty")))
            .map_err(write_err)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("entry")))
        .map_err(write_err)?;
    Ok(())
}

fn write_text_element<W: Write>(
    writer: &mut Writer<W>,
    name: &str,
    attrs: &[(&str, &str)],
    text: &str,
) -> Result<(), SerializerError> {
    let mut el = BytesStart::new(name);
    for (key, value) in attrs {
        el.push_attribute((*key, *value));
    }
    writer.write_event(Event::Start(el)).map_err(write_err)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(write_err)?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(write_err)?;
    Ok(())
}

// ============================================================================
// Reading
// ============================================================================

/// Decodes an item from a serialized document.
///
/// The scan is a single forward pass: every recognized element is picked up
/// wherever it appears, whether or not it sits inside an `<entry>` wrapper,
/// and everything else is ignored. Elements that are absent leave their
/// field at the default, so `deserialize(serialize(&item))` reconstructs
/// the item.
///
/// # Arguments
///
/// * `data` - The document bytes (UTF-8 XML)
///
/// # Returns
///
/// The decoded item. A document without any recognized elements decodes to
/// `Item::default()`.
///
/// # Errors
///
/// Returns [`SerializerError::Malformed`] only when the XML itself is
/// broken (syntax error, truncated document). Unparseable values inside
/// recognized elements are not errors; they degrade to the field default.
///
/// # Security
///
/// quick-xml (0.37) never expands `<!ENTITY>` declarations, so XXE payloads
/// in archive files cannot exfiltrate local data. See SEC-002 in the
/// dependency manifest.
pub fn deserialize(data: &[u8]) -> Result<Item, SerializerError> {
    let mut reader = NsReader::from_reader(data);
    let mut entry = EntryReader::default();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let (resolve, event) = reader.read_resolved_event_into(&mut buf).map_err(xml_err)?;
        let ns = known_ns(resolve);
        match event {
            Event::Start(e) => {
                entry.handle_start(&mut reader, ns, &e)?;
            }
            Event::Empty(e) => entry.handle_empty(&reader, ns, &e)?,
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(entry.finish())
}

/// Decodes every `<entry>` of an Atom `<feed>` document, in document order.
///
/// # Errors
///
/// Returns [`SerializerError::Malformed`] unless `data` holds one complete
/// Atom `<feed>` element: a missing or unclosed root means the file was
/// truncated or is not an archive file at all, and loading it must fail
/// rather than silently yield an empty archive.
pub fn read_feed_entries(data: &[u8]) -> Result<Vec<Item>, SerializerError> {
    let mut reader = NsReader::from_reader(data);
    let mut items = Vec::new();
    let mut buf = Vec::new();
    let mut root_seen = false;
    let mut closed = false;

    loop {
        buf.clear();
        let (resolve, event) = reader.read_resolved_event_into(&mut buf).map_err(xml_err)?;
        let ns = known_ns(resolve);
        match event {
            Event::Start(e) if ns == KnownNs::Atom && e.local_name().as_ref() == b"feed" => {
                root_seen = true;
            }
            Event::Start(e)
                if root_seen
                    && !closed
                    && ns == KnownNs::Atom
                    && e.local_name().as_ref() == b"entry" =>
            {
                items.push(read_entry(&mut reader)?);
            }
            Event::Empty(e) if ns == KnownNs::Atom && e.local_name().as_ref() == b"feed" => {
                root_seen = true;
                closed = true;
            }
            Event::End(e)
                if root_seen && ns == KnownNs::Atom && e.local_name().as_ref() == b"feed" =>
            {
                closed = true;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !root_seen || !closed {
        return Err(SerializerError::Malformed(
            "not a complete Atom feed document".to_string(),
        ));
    }

    Ok(items)
}

/// Consumes one `<entry>` subtree whose start tag was already read.
fn read_entry<R: BufRead>(reader: &mut NsReader<R>) -> Result<Item, SerializerError> {
    let mut entry = EntryReader::default();
    let mut depth = 0usize;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let (resolve, event) = reader.read_resolved_event_into(&mut buf).map_err(xml_err)?;
        let ns = known_ns(resolve);
        match event {
            Event::Start(e) => {
                if !entry.handle_start(reader, ns, &e)? {
                    depth += 1;
                }
            }
            Event::Empty(e) => entry.handle_empty(reader, ns, &e)?,
            Event::End(_) => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            Event::Eof => {
                return Err(SerializerError::Malformed(
                    "unexpected end of document inside entry".to_string(),
                ))
            }
            _ => {}
        }
    }

    Ok(entry.finish())
}

/// The namespaces the decoder dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KnownNs {
    Atom,
    KFeed,
    Comment,
    Slash,
    Itunes,
    Other,
}

fn known_ns(resolve: ResolveResult<'_>) -> KnownNs {
    match resolve {
        ResolveResult::Bound(Namespace(ns)) => {
            if ns == NS_ATOM.as_bytes() {
                KnownNs::Atom
            } else if ns == NS_KFEED.as_bytes() {
                KnownNs::KFeed
            } else if ns == NS_COMMENT.as_bytes() {
                KnownNs::Comment
            } else if ns == NS_SLASH.as_bytes() {
                KnownNs::Slash
            } else if ns == NS_ITUNES.as_bytes() {
                KnownNs::Itunes
            } else {
                KnownNs::Other
            }
        }
        _ => KnownNs::Other,
    }
}

enum LinkKind {
    Alternate(String),
    Enclosure(Enclosure),
    Other,
}

/// Accumulates decoded fields; list-valued fields are collected aside so a
/// partial document never clobbers them with an empty set.
#[derive(Default)]
struct EntryReader {
    item: Item,
    authors: Vec<Person>,
    enclosures: Vec<Enclosure>,
    categories: Vec<Category>,
}

impl EntryReader {
    /// Dispatches one start element. Returns whether the element's whole
    /// subtree was consumed; callers descend into any element we did not.
    fn handle_start<R: BufRead>(
        &mut self,
        reader: &mut NsReader<R>,
        ns: KnownNs,
        e: &BytesStart<'_>,
    ) -> Result<bool, SerializerError> {
        match (ns, e.local_name().as_ref()) {
            (KnownNs::Atom, b"title") => self.item.set_title(read_element_text(reader)?),
            (KnownNs::Atom, b"summary") => self.item.set_description(read_element_text(reader)?),
            (KnownNs::Atom, b"content") => self.item.set_content(read_element_text(reader)?),
            (KnownNs::Atom, b"language") => self.item.set_language(read_element_text(reader)?),
            (KnownNs::Atom, b"id") => self.item.set_id(read_element_text(reader)?),
            (KnownNs::Atom, b"published") => {
                let text = read_element_text(reader)?;
                self.item.set_date_published(parse_date(&text));
            }
            (KnownNs::Atom, b"updated") => {
                let text = read_element_text(reader)?;
                self.item.set_date_updated(parse_date(&text));
            }
            (KnownNs::Atom, b"author") => {
                let person = read_author(reader)?;
                self.authors.push(person);
            }
            (KnownNs::Comment, b"commentRss") => {
                self.item.set_comments_feed(read_element_text(reader)?);
            }
            (KnownNs::Comment, b"comment") => {
                self.item.set_comment_post_uri(read_element_text(reader)?);
            }
            (KnownNs::Slash, b"comments") => {
                let text = read_element_text(reader)?;
                self.item
                    .set_comments_count(text.trim().parse::<i64>().unwrap_or(-1));
            }
            (KnownNs::KFeed, b"commentsLink") => {
                self.item.set_comments_link(read_element_text(reader)?);
            }
            (KnownNs::KFeed, b"status") => {
                let text = read_element_text(reader)?;
                let status = text
                    .trim()
                    .parse::<u32>()
                    .map(Status::from_bits)
                    .unwrap_or(Status::READ);
                self.item.set_status(status);
            }
            (KnownNs::KFeed, b"hash") => {
                let text = read_element_text(reader)?;
                self.item.set_hash(text.trim().parse::<u32>().unwrap_or(0));
            }
            (KnownNs::KFeed, b"idIsHash") => {
                let text = read_element_text(reader)?;
                self.item.set_id_is_hash(parse_bool(&text));
            }
            (KnownNs::KFeed, b"sourceFeedId") => {
                let text = read_element_text(reader)?;
                self.item
                    .set_source_feed_id(text.trim().parse::<i64>().unwrap_or(-1));
            }
            (KnownNs::KFeed, b"customProperty") => {
                let (key, value) = read_custom_property(reader)?;
                if !key.is_empty() {
                    self.item.set_custom_property(key, value);
                }
            }
            (KnownNs::Atom, b"link") | (KnownNs::Atom, b"category") => {
                // Attribute-carried elements; their subtree (normally
                // empty) is left for the caller to descend into.
                self.handle_empty(reader, ns, e)?;
                return Ok(false);
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn handle_empty<R: BufRead>(
        &mut self,
        reader: &NsReader<R>,
        ns: KnownNs,
        e: &BytesStart<'_>,
    ) -> Result<(), SerializerError> {
        match (ns, e.local_name().as_ref()) {
            (KnownNs::Atom, b"link") => match parse_link(reader, e)? {
                LinkKind::Alternate(href) => self.item.set_link(href),
                LinkKind::Enclosure(enclosure) => self.enclosures.push(enclosure),
                LinkKind::Other => {}
            },
            (KnownNs::Atom, b"category") => self.categories.push(parse_category(reader, e)?),
            (KnownNs::Atom, b"author") => self.authors.push(Person::default()),
            _ => {}
        }
        Ok(())
    }

    fn finish(self) -> Item {
        let EntryReader {
            mut item,
            authors,
            enclosures,
            categories,
        } = self;
        if !authors.is_empty() {
            item.set_authors(authors);
        }
        if !enclosures.is_empty() {
            item.set_enclosures(enclosures);
        }
        if !categories.is_empty() {
            item.set_categories(categories);
        }
        item
    }
}

/// Collects the text of the current element, consuming through its end tag.
fn read_element_text<R: BufRead>(reader: &mut NsReader<R>) -> Result<String, SerializerError> {
    let mut out = String::new();
    let mut depth = 0usize;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_event_into(&mut buf).map_err(xml_err)? {
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            Event::Text(t) => out.push_str(&t.unescape().map_err(xml_err)?),
            Event::CData(t) => out.push_str(std::str::from_utf8(&t).map_err(xml_err)?),
            Event::Eof => {
                return Err(SerializerError::Malformed(
                    "unexpected end of document inside element".to_string(),
                ))
            }
            _ => {}
        }
    }

    Ok(out)
}

/// Consumes an `<author>` subtree whose start tag was already read.
fn read_author<R: BufRead>(reader: &mut NsReader<R>) -> Result<Person, SerializerError> {
    let mut person = Person::default();
    let mut depth = 0usize;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let (resolve, event) = reader.read_resolved_event_into(&mut buf).map_err(xml_err)?;
        let ns = known_ns(resolve);
        match event {
            Event::Start(e) => match (ns, e.local_name().as_ref()) {
                (KnownNs::Atom, b"name") => person.name = read_element_text(reader)?,
                (KnownNs::Atom, b"uri") => person.uri = read_element_text(reader)?,
                (KnownNs::Atom, b"email") => person.email = read_element_text(reader)?,
                _ => depth += 1,
            },
            Event::End(_) => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            Event::Eof => {
                return Err(SerializerError::Malformed(
                    "unexpected end of document inside author".to_string(),
                ))
            }
            _ => {}
        }
    }

    Ok(person)
}

/// Consumes a `<kfeed:customProperty>` subtree whose start tag was already
/// read, returning its key and value.
fn read_custom_property<R: BufRead>(
    reader: &mut NsReader<R>,
) -> Result<(String, String), SerializerError> {
    let mut key = String::new();
    let mut value = String::new();
    let mut depth = 0usize;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let (resolve, event) = reader.read_resolved_event_into(&mut buf).map_err(xml_err)?;
        let ns = known_ns(resolve);
        match event {
            Event::Start(e) => match (ns, e.local_name().as_ref()) {
                (KnownNs::KFeed, b"key") => key = read_element_text(reader)?,
                (KnownNs::KFeed, b"value") => value = read_element_text(reader)?,
                _ => depth += 1,
            },
            Event::End(_) => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            Event::Eof => {
                return Err(SerializerError::Malformed(
                    "unexpected end of document inside customProperty".to_string(),
                ))
            }
            _ => {}
        }
    }

    Ok((key, value))
}

fn parse_link<R: BufRead>(
    reader: &NsReader<R>,
    e: &BytesStart<'_>,
) -> Result<LinkKind, SerializerError> {
    let mut rel = String::new();
    let mut href = String::new();
    let mut title = String::new();
    let mut mime_type = String::new();
    let mut length = 0u32;
    let mut duration = 0u32;

    let decoder = reader.decoder();
    for attr in e.attributes() {
        let attr = attr.map_err(xml_err)?;
        let (resolve, local) = reader.resolve_attribute(attr.key);
        let ns = known_ns(resolve);
        let value = attr.decode_and_unescape_value(decoder).map_err(xml_err)?;
        match (ns, local.as_ref()) {
            (KnownNs::Itunes, b"duration") => duration = value.trim().parse().unwrap_or(0),
            (_, b"rel") => rel = value.into_owned(),
            (_, b"href") => href = value.into_owned(),
            (_, b"title") => title = value.into_owned(),
            (_, b"length") => length = value.trim().parse().unwrap_or(0),
            (_, b"type") => mime_type = value.into_owned(),
            _ => {}
        }
    }

    Ok(if rel == "enclosure" {
        LinkKind::Enclosure(Enclosure {
            url: href,
            title,
            mime_type,
            length,
            duration,
        })
    } else if rel.is_empty() || rel == "alternate" {
        LinkKind::Alternate(href)
    } else {
        LinkKind::Other
    })
}

fn parse_category<R: BufRead>(
    reader: &NsReader<R>,
    e: &BytesStart<'_>,
) -> Result<Category, SerializerError> {
    let mut category = Category::default();
    let decoder = reader.decoder();
    for attr in e.attributes() {
        let attr = attr.map_err(xml_err)?;
        let value = attr.decode_and_unescape_value(decoder).map_err(xml_err)?;
        match attr.key.local_name().as_ref() {
            b"term" => category.term = value.into_owned(),
            b"scheme" => category.scheme = value.into_owned(),
            b"label" => category.label = value.into_owned(),
            _ => {}
        }
    }
    Ok(category)
}

fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_bool(text: &str) -> bool {
    matches!(text.trim(), "true" | "1")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use proptest::collection::vec;
    use proptest::prelude::*;

    fn as_text(bytes: &[u8]) -> String {
        String::from_utf8(bytes.to_vec()).expect("serializer output is UTF-8")
    }

    #[test]
    fn test_default_item_omits_everything() {
        let bytes = serialize(&Item::new()).unwrap();
        let text = as_text(&bytes);

        assert!(text.contains(r#"<entry xmlns="http://www.w3.org/2005/Atom""#));
        assert!(!text.contains("<title"));
        assert!(!text.contains("<summary"));
        assert!(!text.contains("<published"));
        assert!(!text.contains("kfeed:status"));
        assert!(!text.contains("kfeed:hash"));
        assert!(!text.contains("kfeed:idIsHash"));
        assert!(!text.contains("kfeed:sourceFeedId"));
        assert!(!text.contains("slash:comments"));

        assert_eq!(deserialize(&bytes).unwrap(), Item::new());
    }

    #[test]
    fn test_round_trip_populated_item() {
        let mut item = Item::new();
        item.set_id("urn:example:article-1");
        item.set_title("A <b>bold</b> headline");
        item.set_link("https://example.com/article-1");
        item.set_description("Short summary");
        item.set_content("Full <p>body</p> text");
        item.set_language("en");
        item.set_date_published(Some(Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()));
        item.set_status(Status::UNREAD);
        item.set_hash(12345);
        item.set_id_is_hash(true);
        item.set_source_feed_id(7);
        item.set_comments_count(42);
        item.set_comments_link("https://example.com/article-1#comments");
        item.set_comments_feed("https://example.com/article-1/comments.rss");
        item.set_comment_post_uri("https://example.com/api/comment");

        let bytes = serialize(&item).unwrap();
        let text = as_text(&bytes);
        assert!(text.contains(r#"<title type="html">"#));
        assert!(text.contains(r#"rel="alternate""#));
        assert!(text.contains("<published>2024-03-15T12:00:00Z</published>"));
        assert!(text.contains("<slash:comments>42</slash:comments>"));

        assert_eq!(deserialize(&bytes).unwrap(), item);
    }

    #[test]
    fn test_combined_status_round_trips() {
        let mut item = Item::new();
        item.set_status(Status::UNREAD | Status::IMPORTANT);

        let bytes = serialize(&item).unwrap();
        assert!(as_text(&bytes).contains("<kfeed:status>10</kfeed:status>"));

        let back = deserialize(&bytes).unwrap();
        assert_eq!(back.status(), Status::UNREAD | Status::IMPORTANT);
        assert!(back.status().contains(Status::UNREAD));
        assert!(back.status().contains(Status::IMPORTANT));
    }

    #[test]
    fn test_enclosures_round_trip() {
        let mut item = Item::new();
        item.set_enclosures(vec![
            Enclosure {
                url: "https://example.com/ep1.mp3".to_string(),
                title: "Episode 1".to_string(),
                mime_type: "audio/mpeg".to_string(),
                length: 123456,
                duration: 60,
            },
            Enclosure {
                url: "https://example.com/ep2.mp3".to_string(),
                title: String::new(),
                mime_type: "audio/mpeg".to_string(),
                length: 0,
                duration: 0,
            },
        ]);

        let bytes = serialize(&item).unwrap();
        let text = as_text(&bytes);
        assert!(text.contains(r#"itunes:duration="60""#));
        assert!(!text.contains(r#"itunes:duration="0""#));
        assert!(text.contains(r#"length="123456""#));
        assert!(text.contains(r#"length="0""#));

        assert_eq!(deserialize(&bytes).unwrap(), item);
    }

    #[test]
    fn test_enclosure_length_written_even_when_zero() {
        let mut item = Item::new();
        item.set_enclosures(vec![Enclosure::default()]);

        let bytes = serialize(&item).unwrap();
        assert!(as_text(&bytes).contains(r#"<link rel="enclosure" length="0"/>"#));
        assert_eq!(deserialize(&bytes).unwrap(), item);
    }

    #[test]
    fn test_categories_preserve_order() {
        let mut item = Item::new();
        item.set_categories(vec![
            Category {
                term: "rust".to_string(),
                scheme: "https://example.com/tags".to_string(),
                label: "Rust".to_string(),
            },
            Category {
                term: "xml".to_string(),
                scheme: String::new(),
                label: String::new(),
            },
            Category {
                term: "archive".to_string(),
                scheme: "https://example.com/tags".to_string(),
                label: String::new(),
            },
        ]);

        let back = deserialize(&serialize(&item).unwrap()).unwrap();
        assert_eq!(back.categories(), item.categories());
    }

    #[test]
    fn test_authors_round_trip() {
        let mut item = Item::new();
        item.set_authors(vec![
            Person {
                name: "Jo Writer".to_string(),
                uri: "https://example.com/jo".to_string(),
                email: "jo@example.com".to_string(),
            },
            Person {
                name: "Anonymous".to_string(),
                uri: String::new(),
                email: String::new(),
            },
        ]);

        let bytes = serialize(&item).unwrap();
        let text = as_text(&bytes);
        assert!(text.contains("<name>Jo Writer</name>"));
        assert!(text.contains("<email>jo@example.com</email>"));

        assert_eq!(deserialize(&bytes).unwrap(), item);
    }

    #[test]
    fn test_custom_properties_round_trip() {
        let mut item = Item::new();
        item.set_custom_property("zebra", "stripes");
        item.set_custom_property("alpha", "first");

        let bytes = serialize(&item).unwrap();
        let text = as_text(&bytes);
        assert!(text.contains("<kfeed:customProperty>"));
        assert!(text.contains("<kfeed:key>alpha</kfeed:key>"));

        assert_eq!(deserialize(&bytes).unwrap(), item);
    }

    #[test]
    fn test_custom_property_empty_value_omits_value_element() {
        let mut item = Item::new();
        item.set_custom_property("flag", "");

        let bytes = serialize(&item).unwrap();
        let text = as_text(&bytes);
        assert!(text.contains("<kfeed:key>flag</kfeed:key>"));
        assert!(!text.contains("<kfeed:value>"));

        assert_eq!(deserialize(&bytes).unwrap(), item);
    }

    #[test]
    fn test_content_equal_to_description_is_not_written() {
        let mut item = Item::new();
        item.set_description("same text");
        item.set_content("same text");
        assert!(!as_text(&serialize(&item).unwrap()).contains("<content"));

        item.set_content("different text");
        assert!(as_text(&serialize(&item).unwrap()).contains("<content"));
    }

    #[test]
    fn test_updated_equal_to_published_is_not_written() {
        let when = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();

        let mut item = Item::new();
        item.set_date_published(Some(when));
        item.set_date_updated(Some(when));
        let text = as_text(&serialize(&item).unwrap());
        assert!(text.contains("<published>"));
        assert!(!text.contains("<updated>"));

        // Only published set: the updated fallback must not produce an element.
        let mut item = Item::new();
        item.set_date_published(Some(when));
        let text = as_text(&serialize(&item).unwrap());
        assert!(text.contains("<published>"));
        assert!(!text.contains("<updated>"));

        // Only updated set: no published element, updated written.
        let mut item = Item::new();
        item.set_date_updated(Some(when));
        let text = as_text(&serialize(&item).unwrap());
        assert!(!text.contains("<published>"));
        assert!(text.contains("<updated>2024-03-15T12:00:00Z</updated>"));
        assert_eq!(deserialize(&serialize(&item).unwrap()).unwrap(), item);
    }

    #[test]
    fn test_escaping_round_trips() {
        let mut item = Item::new();
        item.set_title(r#"Tom & Jerry <"quoted">"#);
        item.set_link("https://example.com/?a=1&b=2");

        let bytes = serialize(&item).unwrap();
        let text = as_text(&bytes);
        assert!(text.contains("&amp;"));
        assert!(text.contains("&lt;"));

        assert_eq!(deserialize(&bytes).unwrap(), item);
    }

    #[test]
    fn test_malformed_xml_is_an_error() {
        assert!(deserialize(b"<entry").is_err());
        assert!(deserialize(b"<entry><title>truncated").is_err());
        assert!(deserialize(b"< < not xml > >").is_err());
    }

    #[test]
    fn test_unknown_elements_are_skipped() {
        let doc = br#"<?xml version="1.0" encoding="UTF-8"?>
<entry xmlns="http://www.w3.org/2005/Atom" xmlns:kfeed="http://akregator.kde.org/kfeed#">
  <title type="html">Kept</title>
  <wrapper>
    <kfeed:hash>42</kfeed:hash>
    <mystery attr="x">noise</mystery>
  </wrapper>
  <unrelated/>
  <id>urn:example:1</id>
</entry>"#;

        let item = deserialize(doc).unwrap();
        assert_eq!(item.title(), "Kept");
        assert_eq!(item.hash(), 42);
        assert_eq!(item.id(), "urn:example:1");
    }

    #[test]
    fn test_foreign_prefixes_resolve_by_namespace() {
        let doc = br#"<?xml version="1.0"?>
<entry xmlns="http://www.w3.org/2005/Atom"
       xmlns:k="http://akregator.kde.org/kfeed#"
       xmlns:wfw="http://wellformedweb.org/CommentAPI/"
       xmlns:s="http://purl.org/rss/1.0/modules/slash/">
  <k:status>2</k:status>
  <k:sourceFeedId>9</k:sourceFeedId>
  <wfw:commentRss>https://example.com/comments.rss</wfw:commentRss>
  <s:comments>17</s:comments>
</entry>"#;

        let item = deserialize(doc).unwrap();
        assert_eq!(item.status(), Status::UNREAD);
        assert_eq!(item.source_feed_id(), 9);
        assert_eq!(item.comments_feed(), "https://example.com/comments.rss");
        assert_eq!(item.comments_count(), 17);
    }

    #[test]
    fn test_bool_parsing_accepts_one() {
        let doc = br#"<entry xmlns="http://www.w3.org/2005/Atom" xmlns:kfeed="http://akregator.kde.org/kfeed#"><kfeed:idIsHash>1</kfeed:idIsHash></entry>"#;
        assert!(deserialize(doc).unwrap().id_is_hash());

        let doc = br#"<entry xmlns="http://www.w3.org/2005/Atom" xmlns:kfeed="http://akregator.kde.org/kfeed#"><kfeed:idIsHash>yes</kfeed:idIsHash></entry>"#;
        assert!(!deserialize(doc).unwrap().id_is_hash());
    }

    #[test]
    fn test_unparseable_values_degrade_to_defaults() {
        let doc = br#"<entry xmlns="http://www.w3.org/2005/Atom"
                             xmlns:kfeed="http://akregator.kde.org/kfeed#"
                             xmlns:slash="http://purl.org/rss/1.0/modules/slash/">
  <published>not a date</published>
  <slash:comments>many</slash:comments>
  <kfeed:hash>deadbeef</kfeed:hash>
</entry>"#;

        let item = deserialize(doc).unwrap();
        assert!(item.date_published().is_none());
        assert_eq!(item.comments_count(), -1);
        assert_eq!(item.hash(), 0);
    }

    #[test]
    fn test_author_subtree_consumption_does_not_leak() {
        let doc = br#"<entry xmlns="http://www.w3.org/2005/Atom">
  <author>
    <name>First Author</name>
    <junk><id>urn:not-the-entry-id</id></junk>
    <email>a@example.com</email>
  </author>
  <id>urn:the-real-id</id>
</entry>"#;

        let item = deserialize(doc).unwrap();
        assert_eq!(item.authors().len(), 1);
        assert_eq!(item.authors()[0].name, "First Author");
        assert_eq!(item.authors()[0].email, "a@example.com");
        // The id inside the author's junk child belongs to the author
        // subtree and must not overwrite the entry id.
        assert_eq!(item.id(), "urn:the-real-id");
    }

    #[test]
    fn test_dispatch_without_entry_wrapper() {
        let doc = br#"<title xmlns="http://www.w3.org/2005/Atom" type="html">Bare</title>"#;
        assert_eq!(deserialize(doc).unwrap().title(), "Bare");
    }

    #[test]
    fn test_feed_document_round_trip() {
        let mut first = Item::new();
        first.set_id("urn:1");
        first.set_title("one");
        let mut second = Item::new();
        second.set_id("urn:2");
        second.set_status(Status::NEW | Status::UNREAD);
        let mut third = Item::new();
        third.set_id("urn:3");
        third.set_custom_property("k", "v");

        let items = vec![first, second, third];
        let bytes = write_feed(items.iter()).unwrap();
        let text = as_text(&bytes);
        // Namespaces declared once on the feed root, not per entry.
        assert!(text.contains(r#"<feed xmlns="http://www.w3.org/2005/Atom""#));
        assert!(text.contains("<entry>"));

        assert_eq!(read_feed_entries(&bytes).unwrap(), items);
    }

    #[test]
    fn test_empty_feed_document() {
        let bytes = write_feed(std::iter::empty()).unwrap();
        assert!(read_feed_entries(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_feed_reader_rejects_incomplete_documents() {
        // Truncated or namespace-less data must not read as an empty feed.
        assert!(read_feed_entries(b"<feed><entry>").is_err());
        assert!(read_feed_entries(b"<feed><entry><id>trunc").is_err());
        assert!(read_feed_entries(b"").is_err());
        assert!(read_feed_entries(b"<other xmlns=\"urn:x\"/>").is_err());

        let empty = br#"<feed xmlns="http://www.w3.org/2005/Atom"></feed>"#;
        assert!(read_feed_entries(empty).unwrap().is_empty());
        let self_closed = br#"<feed xmlns="http://www.w3.org/2005/Atom"/>"#;
        assert!(read_feed_entries(self_closed).unwrap().is_empty());
    }

    // ------------------------------------------------------------------
    // Round-trip law over the supported space: stored content empty or
    // different from the description, and updated date unset or different
    // from the published date. Dates are whole seconds, which is all the
    // wire format carries.
    // ------------------------------------------------------------------

    fn text_strategy() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9 <>&\"'._:/@-]{0,40}"
    }

    fn date_strategy() -> impl Strategy<Value = Option<DateTime<Utc>>> {
        proptest::option::of(
            (0i64..4_102_444_800i64).prop_map(|secs| DateTime::from_timestamp(secs, 0).unwrap()),
        )
    }

    fn status_strategy() -> impl Strategy<Value = Status> {
        prop_oneof![
            Just(Status::READ),
            Just(Status::UNREAD),
            Just(Status::NEW | Status::UNREAD),
            Just(Status::UNREAD | Status::IMPORTANT),
            Just(Status::READ | Status::IMPORTANT),
        ]
    }

    fn person_strategy() -> impl Strategy<Value = Person> {
        ("[a-zA-Z ]{0,15}", "[a-z:/._-]{0,20}", "[a-z@._-]{0,15}").prop_map(
            |(name, uri, email)| Person { name, uri, email },
        )
    }

    fn enclosure_strategy() -> impl Strategy<Value = Enclosure> {
        (
            "[a-z:/._-]{0,30}",
            "[a-zA-Z0-9 ]{0,10}",
            "[a-z/+-]{0,15}",
            any::<u32>(),
            any::<u32>(),
        )
            .prop_map(|(url, title, mime_type, length, duration)| Enclosure {
                url,
                title,
                mime_type,
                length,
                duration,
            })
    }

    fn category_strategy() -> impl Strategy<Value = Category> {
        ("[a-z0-9-]{0,12}", "[a-z:/._-]{0,20}", "[a-zA-Z ]{0,12}").prop_map(
            |(term, scheme, label)| Category {
                term,
                scheme,
                label,
            },
        )
    }

    fn item_strategy() -> impl Strategy<Value = Item> {
        (
            (
                "[a-z:/._-]{0,30}",
                text_strategy(),
                text_strategy(),
                text_strategy(),
                "[a-z]{0,5}",
                "[a-z:/._-]{0,30}",
            ),
            (date_strategy(), date_strategy()),
            (
                vec(person_strategy(), 0..3),
                vec(enclosure_strategy(), 0..3),
                vec(category_strategy(), 0..3),
            ),
            (
                -1i64..1000,
                "[a-z:/._-]{0,20}",
                "[a-z:/._-]{0,20}",
                "[a-z:/._-]{0,20}",
            ),
            (status_strategy(), any::<bool>(), any::<u32>(), -1i64..50),
            vec(("[a-z][a-z0-9_]{0,8}", "[a-zA-Z0-9 ]{0,12}"), 0..3),
        )
            .prop_map(|(core, dates, lists, comments, meta, props)| {
                let (id, title, description, mut content, language, link) = core;
                let (published, mut updated) = dates;
                let (authors, enclosures, categories) = lists;
                let (comments_count, comments_link, comments_feed, comment_post_uri) = comments;
                let (status, id_is_hash, hash, source_feed_id) = meta;

                if !content.is_empty() && content == description {
                    content.push('!');
                }
                if updated == published {
                    updated = None;
                }

                let mut item = Item::new();
                item.set_id(id);
                item.set_title(title);
                item.set_description(description);
                item.set_content(content);
                item.set_language(language);
                item.set_link(link);
                item.set_date_published(published);
                item.set_date_updated(updated);
                item.set_authors(authors);
                item.set_enclosures(enclosures);
                item.set_categories(categories);
                item.set_comments_count(comments_count);
                item.set_comments_link(comments_link);
                item.set_comments_feed(comments_feed);
                item.set_comment_post_uri(comment_post_uri);
                item.set_status(status);
                item.set_id_is_hash(id_is_hash);
                item.set_hash(hash);
                item.set_source_feed_id(source_feed_id);
                for (key, value) in props {
                    item.set_custom_property(key, value);
                }
                item
            })
    }

    proptest! {
        #[test]
        fn round_trip_preserves_supported_items(item in item_strategy()) {
            let bytes = serialize(&item).unwrap();
            let back = deserialize(&bytes).unwrap();
            prop_assert_eq!(back, item);
        }
    }
}
