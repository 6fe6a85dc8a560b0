use std::borrow::Cow;

use encoding_rs::{Encoding, UTF_8};
use log::{debug, trace};
use quick_xml::escape::{unescape, EscapeError};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use thiserror::Error;

use crate::document::{EwpDocument, FileEntry, OpaqueBlock, XmlDeclaration};

const ROOT_TAG: &str = "project";
const VERSION_TAG: &str = "fileVersion";
const CONFIGURATION_TAG: &str = "configuration";
const GROUP_TAG: &str = "group";
const FILE_TAG: &str = "file";
const NAME_TAG: &str = "name";
const EXCLUDED_TAG: &str = "excluded";

/// Errors raised while turning bytes into an [`EwpDocument`].
/// 將位元組解碼為 [`EwpDocument`] 時可能發生的錯誤。
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed project markup at byte {position}: {source}")]
    Xml {
        position: usize,
        #[source]
        source: quick_xml::Error,
    },
    #[error("invalid escape sequence in project markup: {0}")]
    Escape(#[from] EscapeError),
    #[error("expected <project> root element, found <{0}>")]
    UnexpectedRoot(String),
    #[error("document has no root element")]
    MissingRoot,
    #[error("project is missing <fileVersion>")]
    MissingVersion,
    #[error("invalid <fileVersion> value `{0}`")]
    InvalidVersion(String),
    #[error("<file> is missing required <{0}>")]
    MissingField(&'static str),
    #[error("unexpected <{found}> inside text element <{parent}>")]
    UnexpectedElement {
        parent: &'static str,
        found: String,
    },
    #[error("unexpected end of document inside <{0}>")]
    UnexpectedEof(&'static str),
    #[error("unexpected content after the root element at byte {0}")]
    ContentOutsideRoot(usize),
    #[error("unsupported document encoding `{0}`")]
    UnsupportedEncoding(String),
    #[error("document is not valid {0}")]
    InvalidEncoding(&'static str),
}

/// Errors raised while serialising an [`EwpDocument`].
/// 將 [`EwpDocument`] 編碼為位元組時可能發生的錯誤。
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to write project markup: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("{kind} block #{index} is not well-formed markup")]
    InvalidOpaqueBlock { kind: &'static str, index: usize },
    #[error("unsupported document encoding `{0}`")]
    UnsupportedEncoding(String),
    #[error("project contains characters not representable in {0}")]
    Unmappable(&'static str),
}

/// Formatting applied by [`encode_with`].
/// 編碼時使用的縮排設定。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    pub indent_char: u8,
    pub indent_size: usize,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            indent_char: b' ',
            indent_size: 4,
        }
    }
}

impl EncodeOptions {
    pub fn tabs() -> Self {
        Self {
            indent_char: b'\t',
            indent_size: 1,
        }
    }
}

impl EwpDocument {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode(bytes)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        encode(self)
    }
}

/// Parses a complete `.ewp` document.
/// 解析完整的 `.ewp` 文件；檔案順序與來源一致，不會重新排序。
///
/// The character encoding named by the XML declaration is honoured. Opaque
/// blocks keep their inner markup verbatim, including whitespace.
pub fn decode(bytes: &[u8]) -> Result<EwpDocument, DecodeError> {
    let encoding = sniff_encoding(bytes)?;
    let (text, had_errors) = encoding.decode_with_bom_removal(bytes);
    if had_errors {
        return Err(DecodeError::InvalidEncoding(encoding.name()));
    }
    let document = decode_str(&text)?;
    debug!(
        "decoded project: fileVersion {}, {} configuration(s), {} group(s), {} file(s)",
        document.file_version,
        document.configurations.len(),
        document.groups.len(),
        document.files.len()
    );
    Ok(document)
}

/// Serialises `document` with [`EncodeOptions::default`].
pub fn encode(document: &EwpDocument) -> Result<Vec<u8>, EncodeError> {
    encode_with(document, &EncodeOptions::default())
}

/// Serialises `document`, re-emitting opaque blocks exactly as stored.
/// 依設定序列化文件；不透明區塊原樣輸出。
pub fn encode_with(document: &EwpDocument, options: &EncodeOptions) -> Result<Vec<u8>, EncodeError> {
    let encoding = target_encoding(document.declaration.as_ref())?;
    let text = write_document(document, options, encoding)?;
    let (bytes, _, unmappable) = encoding.encode(&text);
    if unmappable {
        return Err(EncodeError::Unmappable(encoding.name()));
    }
    debug!(
        "encoded project: {} file(s), {} bytes as {}",
        document.files.len(),
        bytes.len(),
        encoding.name()
    );
    Ok(bytes.into_owned())
}

fn sniff_encoding(bytes: &[u8]) -> Result<&'static Encoding, DecodeError> {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return Ok(encoding);
    }
    let mut reader = Reader::from_reader(bytes);
    let label = match reader.read_event() {
        Ok(Event::Decl(decl)) => match decl.encoding() {
            Some(Ok(label)) => label.into_owned(),
            _ => return Ok(UTF_8),
        },
        // Anything else is reported by the full parse.
        _ => return Ok(UTF_8),
    };
    Encoding::for_label(&label)
        .ok_or_else(|| DecodeError::UnsupportedEncoding(String::from_utf8_lossy(&label).into_owned()))
}

fn target_encoding(
    declaration: Option<&XmlDeclaration>,
) -> Result<&'static Encoding, EncodeError> {
    let Some(label) = declaration.and_then(|decl| decl.encoding.as_deref()) else {
        return Ok(UTF_8);
    };
    // encoding_rs cannot produce UTF-16; such documents are written as UTF-8.
    Encoding::for_label(label.as_bytes())
        .map(Encoding::output_encoding)
        .ok_or_else(|| EncodeError::UnsupportedEncoding(label.to_string()))
}

fn decode_str(text: &str) -> Result<EwpDocument, DecodeError> {
    let mut reader = Reader::from_str(text);
    reader.trim_text(false).check_end_names(true);

    let mut declaration = None;
    loop {
        match next_event(&mut reader)? {
            Event::Decl(decl) => declaration = Some(read_declaration(&reader, &decl)?),
            Event::Start(start) => {
                let name = element_name(&start);
                if name != ROOT_TAG {
                    return Err(DecodeError::UnexpectedRoot(name.to_string()));
                }
                let mut document = read_project(&mut reader)?;
                document.declaration = declaration;
                expect_end_of_input(&mut reader)?;
                return Ok(document);
            }
            Event::Empty(start) => {
                let name = element_name(&start);
                if name != ROOT_TAG {
                    return Err(DecodeError::UnexpectedRoot(name.to_string()));
                }
                return Err(DecodeError::MissingVersion);
            }
            Event::Text(text) if is_blank(&text) => {}
            Event::Text(_) | Event::CData(_) | Event::End(_) => {
                return Err(DecodeError::ContentOutsideRoot(reader.buffer_position()));
            }
            Event::Eof => return Err(DecodeError::MissingRoot),
            _ => {}
        }
    }
}

fn read_project(reader: &mut Reader<&[u8]>) -> Result<EwpDocument, DecodeError> {
    let mut file_version = None;
    let mut configurations = Vec::new();
    let mut groups = Vec::new();
    let mut files = Vec::new();

    loop {
        match next_event(reader)? {
            Event::Start(start) => match element_name(&start) {
                VERSION_TAG => file_version = Some(parse_version(&read_value(reader, VERSION_TAG)?)?),
                CONFIGURATION_TAG => {
                    configurations.push(OpaqueBlock::new(read_inner(reader, &start)?));
                }
                GROUP_TAG => groups.push(OpaqueBlock::new(read_inner(reader, &start)?)),
                FILE_TAG => files.push(read_file(reader)?),
                other => {
                    trace!("skipping unknown <{other}> in project");
                    skip_element(reader, &start)?;
                }
            },
            Event::Empty(start) => match element_name(&start) {
                VERSION_TAG => return Err(DecodeError::InvalidVersion(String::new())),
                CONFIGURATION_TAG => configurations.push(OpaqueBlock::default()),
                GROUP_TAG => groups.push(OpaqueBlock::default()),
                FILE_TAG => return Err(DecodeError::MissingField(NAME_TAG)),
                _ => {}
            },
            Event::End(_) => break,
            Event::Eof => return Err(DecodeError::UnexpectedEof(ROOT_TAG)),
            _ => {}
        }
    }

    let file_version = file_version.ok_or(DecodeError::MissingVersion)?;
    Ok(EwpDocument {
        declaration: None,
        file_version,
        configurations,
        groups,
        files,
    })
}

fn read_file(reader: &mut Reader<&[u8]>) -> Result<FileEntry, DecodeError> {
    let mut path = None;
    let mut exclusions = None;

    loop {
        match next_event(reader)? {
            Event::Start(start) => match element_name(&start) {
                NAME_TAG => path = Some(read_value(reader, NAME_TAG)?),
                EXCLUDED_TAG => exclusions = Some(read_exclusions(reader)?),
                _ => skip_element(reader, &start)?,
            },
            Event::Empty(start) => match element_name(&start) {
                NAME_TAG => path = Some(String::new()),
                EXCLUDED_TAG => exclusions = Some(Vec::new()),
                _ => {}
            },
            Event::End(_) => break,
            Event::Eof => return Err(DecodeError::UnexpectedEof(FILE_TAG)),
            _ => {}
        }
    }

    let path = path.ok_or(DecodeError::MissingField(NAME_TAG))?;
    Ok(FileEntry { path, exclusions })
}

fn read_exclusions(reader: &mut Reader<&[u8]>) -> Result<Vec<String>, DecodeError> {
    let mut names = Vec::new();
    loop {
        match next_event(reader)? {
            Event::Start(start) if element_name(&start) == CONFIGURATION_TAG => {
                names.push(read_value(reader, CONFIGURATION_TAG)?);
            }
            Event::Start(start) => skip_element(reader, &start)?,
            Event::Empty(start) if element_name(&start) == CONFIGURATION_TAG => {
                names.push(String::new());
            }
            Event::End(_) => return Ok(names),
            Event::Eof => return Err(DecodeError::UnexpectedEof(EXCLUDED_TAG)),
            _ => {}
        }
    }
}

fn expect_end_of_input(reader: &mut Reader<&[u8]>) -> Result<(), DecodeError> {
    loop {
        match next_event(reader)? {
            Event::Eof => return Ok(()),
            Event::Text(text) if is_blank(&text) => {}
            Event::Comment(_) | Event::PI(_) => {}
            _ => return Err(DecodeError::ContentOutsideRoot(reader.buffer_position())),
        }
    }
}

fn read_declaration(
    reader: &Reader<&[u8]>,
    decl: &BytesDecl<'_>,
) -> Result<XmlDeclaration, DecodeError> {
    let version = decl.version().map_err(|source| xml_error(reader, source))?;
    let encoding = decl
        .encoding()
        .transpose()
        .map_err(|source| xml_error(reader, source))?;
    let standalone = decl
        .standalone()
        .transpose()
        .map_err(|source| xml_error(reader, source))?;
    Ok(XmlDeclaration {
        version: lossy(&version),
        encoding: encoding.as_deref().map(lossy),
        standalone: standalone.as_deref().map(lossy),
    })
}

fn parse_version(value: &str) -> Result<i32, DecodeError> {
    let value = value.trim();
    value
        .parse()
        .map_err(|_| DecodeError::InvalidVersion(value.to_string()))
}

fn next_event<'a>(reader: &mut Reader<&'a [u8]>) -> Result<Event<'a>, DecodeError> {
    reader.read_event().map_err(|source| xml_error(reader, source))
}

/// Raw inner markup of `start`, neither trimmed nor unescaped.
fn read_inner<'a>(
    reader: &mut Reader<&'a [u8]>,
    start: &BytesStart<'_>,
) -> Result<Cow<'a, str>, DecodeError> {
    reader
        .read_text(start.name())
        .map_err(|source| xml_error(reader, source))
}

/// Character data of a text-only element whose start tag was just read.
/// Comments and processing instructions are dropped; CDATA is taken as is.
fn read_value(reader: &mut Reader<&[u8]>, tag: &'static str) -> Result<String, DecodeError> {
    let mut value = String::new();
    loop {
        match next_event(reader)? {
            Event::Text(text) => {
                let raw = reader
                    .decoder()
                    .decode(&text)
                    .map_err(|source| xml_error(reader, source))?;
                value.push_str(&unescape(&raw)?);
            }
            Event::CData(data) => {
                let raw = reader
                    .decoder()
                    .decode(&data)
                    .map_err(|source| xml_error(reader, source))?;
                value.push_str(&raw);
            }
            Event::Start(start) | Event::Empty(start) => {
                return Err(DecodeError::UnexpectedElement {
                    parent: tag,
                    found: element_name(&start).to_string(),
                });
            }
            Event::End(_) => return Ok(value),
            Event::Eof => return Err(DecodeError::UnexpectedEof(tag)),
            _ => {}
        }
    }
}

fn skip_element(reader: &mut Reader<&[u8]>, start: &BytesStart<'_>) -> Result<(), DecodeError> {
    reader
        .read_to_end(start.name())
        .map(|_| ())
        .map_err(|source| xml_error(reader, source))
}

fn xml_error(reader: &Reader<&[u8]>, source: quick_xml::Error) -> DecodeError {
    DecodeError::Xml {
        position: reader.buffer_position(),
        source,
    }
}

fn element_name<'b>(start: &'b BytesStart<'_>) -> &'b str {
    std::str::from_utf8(start.local_name().into_inner()).unwrap_or_default()
}

fn is_blank(text: &[u8]) -> bool {
    text.iter().all(u8::is_ascii_whitespace)
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn write_document(
    document: &EwpDocument,
    options: &EncodeOptions,
    encoding: &'static Encoding,
) -> Result<String, EncodeError> {
    let mut writer = Writer::new_with_indent(Vec::new(), options.indent_char, options.indent_size);

    if let Some(decl) = &document.declaration {
        // The label must name the encoding the bytes are actually written in.
        let label = decl.encoding.as_deref().map(|label| {
            if Encoding::for_label(label.as_bytes()) == Some(encoding) {
                label
            } else {
                encoding.name()
            }
        });
        writer.write_event(Event::Decl(BytesDecl::new(
            &decl.version,
            label,
            decl.standalone.as_deref(),
        )))?;
    }
    writer.write_event(Event::Start(BytesStart::new(ROOT_TAG)))?;
    write_text_element(&mut writer, VERSION_TAG, &document.file_version.to_string())?;

    for (index, block) in document.configurations.iter().enumerate() {
        write_opaque(&mut writer, CONFIGURATION_TAG, index, block)?;
    }
    for (index, block) in document.groups.iter().enumerate() {
        write_opaque(&mut writer, GROUP_TAG, index, block)?;
    }
    for file in &document.files {
        write_file(&mut writer, file)?;
    }

    writer.write_event(Event::End(BytesEnd::new(ROOT_TAG)))?;
    let mut bytes = writer.into_inner();
    bytes.push(b'\n');
    // Every event above was built from `&str`, so the buffer is UTF-8.
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn write_file(writer: &mut Writer<Vec<u8>>, file: &FileEntry) -> Result<(), EncodeError> {
    writer.write_event(Event::Start(BytesStart::new(FILE_TAG)))?;
    write_text_element(writer, NAME_TAG, &file.path)?;
    match file.exclusions.as_deref() {
        None => {}
        Some([]) => writer.write_event(Event::Empty(BytesStart::new(EXCLUDED_TAG)))?,
        Some(names) => {
            writer.write_event(Event::Start(BytesStart::new(EXCLUDED_TAG)))?;
            for name in names {
                write_text_element(writer, CONFIGURATION_TAG, name)?;
            }
            writer.write_event(Event::End(BytesEnd::new(EXCLUDED_TAG)))?;
        }
    }
    writer.write_event(Event::End(BytesEnd::new(FILE_TAG)))?;
    Ok(())
}

fn write_opaque(
    writer: &mut Writer<Vec<u8>>,
    kind: &'static str,
    index: usize,
    block: &OpaqueBlock,
) -> Result<(), EncodeError> {
    if !is_well_formed_fragment(block.raw()) {
        return Err(EncodeError::InvalidOpaqueBlock { kind, index });
    }
    writer.write_event(Event::Start(BytesStart::new(kind)))?;
    writer.write_event(Event::Text(BytesText::from_escaped(block.raw())))?;
    writer.write_event(Event::End(BytesEnd::new(kind)))?;
    Ok(())
}

fn write_text_element(
    writer: &mut Writer<Vec<u8>>,
    tag: &str,
    value: &str,
) -> Result<(), quick_xml::Error> {
    writer.write_event(Event::Start(BytesStart::new(tag)))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new(tag)))
}

/// Checks that `raw` can sit between a start and end tag without changing
/// the surrounding structure.
fn is_well_formed_fragment(raw: &str) -> bool {
    let mut reader = Reader::from_str(raw);
    reader.check_end_names(true);
    let mut depth = 0usize;
    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) => depth += 1,
            Ok(Event::End(_)) => match depth.checked_sub(1) {
                Some(next) => depth = next,
                None => return false,
            },
            Ok(Event::Eof) => return depth == 0,
            Ok(_) => {}
            Err(_) => return false,
        }
    }
}
