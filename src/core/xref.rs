use super::base_stream::BaseStream;
use super::decode::{apply_filters, decode_stream_object};
use super::error::{PDFError, PDFResult};
use super::lexer::Lexer;
use super::options::ReaderOptions;
use super::parser::{PDFDict, PDFObject, Parser, Ref};
use super::stream::Stream;
use log::{debug, warn};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

/// Cross-reference table entry.
///
/// Each entry in the xref table describes where to find an indirect object
/// in the PDF file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XRefEntry {
    /// Free entry - object number is available for reuse
    Free { next_free: u64, generation: u32 },

    /// Uncompressed entry - object is stored uncompressed at given offset
    Uncompressed { offset: u64, generation: u32 },

    /// Compressed entry - object is stored in an object stream
    Compressed { obj_stream_num: u32, index: u32 },
}

impl XRefEntry {
    /// Returns true if this entry is free.
    pub fn is_free(&self) -> bool {
        matches!(self, XRefEntry::Free { .. })
    }

    /// Returns the generation number for this entry.
    ///
    /// Objects inside object streams always have generation 0.
    pub fn generation(&self) -> u32 {
        match self {
            XRefEntry::Free { generation, .. } => *generation,
            XRefEntry::Uncompressed { generation, .. } => *generation,
            XRefEntry::Compressed { .. } => 0,
        }
    }
}

/// Parameters of a linearized file, read from the linearization
/// dictionary that opens it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearizedInfo {
    /// `/L`: file length the linearization was written for
    pub file_length: u64,
    /// `/O`: object number of the first page
    pub first_page_object: u32,
    /// `/N`: number of pages
    pub page_count: u32,
    /// `/T`: offset of the first entry of the main xref table
    pub main_xref_offset: u64,
}

/// A decoded object stream (`/Type /ObjStm`).
struct ObjectStream {
    data: Arc<Vec<u8>>,
    /// `/First`: offset of the first member inside `data`
    first: usize,
    /// (object number, offset relative to `first`) pairs from the header
    members: Vec<(u32, usize)>,
}

/// Cross-reference table for a PDF document.
///
/// Merges every revision reachable from `startxref` into one map from
/// object number to location, newest revision first, and memoizes every
/// object parsed through it. When the declared chain is unusable the map
/// is rebuilt by scanning the file for `n g obj` headers.
pub struct XRef {
    /// Stream to read PDF data from
    stream: Box<dyn BaseStream>,

    /// Merged entries, keyed by object number
    entries: FxHashMap<u32, XRefEntry>,

    /// Trailer of the newest revision
    trailer: PDFDict,

    /// Cache of parsed objects
    cache: FxHashMap<Ref, Arc<PDFObject>>,

    /// Decoded object streams, keyed by their object number
    object_streams: FxHashMap<u32, Arc<ObjectStream>>,

    /// Objects currently being parsed, to break `/Length` cycles
    in_progress: FxHashSet<Ref>,

    linearized: Option<LinearizedInfo>,
    revision_count: usize,
    recovered: bool,
    max_revisions: usize,
    recover_xref: bool,
}

impl XRef {
    /// Creates a new, empty XRef table over the given file stream.
    pub fn new(stream: Box<dyn BaseStream>, options: &ReaderOptions) -> Self {
        XRef {
            stream,
            entries: FxHashMap::default(),
            trailer: PDFDict::default(),
            cache: FxHashMap::default(),
            object_streams: FxHashMap::default(),
            in_progress: FxHashSet::default(),
            linearized: None,
            revision_count: 0,
            recovered: false,
            max_revisions: options.max_revisions,
            recover_xref: options.recover_xref,
        }
    }

    /// Builds the merged cross-reference map.
    ///
    /// Walks the revision chain starting at `startxref`. If the chain is
    /// unreadable, or yields no usable catalog, the map is rebuilt by
    /// scanning the file (unless recovery is disabled).
    pub fn parse(&mut self, startxref: Option<usize>) -> PDFResult<()> {
        self.linearized = self.detect_linearized();
        if let Some(info) = &self.linearized {
            debug!(
                "Linearized file: {} pages, first page object {}",
                info.page_count, info.first_page_object
            );
        }

        let declared = match startxref {
            Some(offset) => self.read_revision_chain(offset),
            None => Err(PDFError::XRef("startxref not found".to_string())),
        };
        let usable = declared.and_then(|_| self.ensure_root());

        if let Err(e) = usable {
            if !self.recover_xref {
                return Err(e);
            }
            warn!("Declared xref is unusable ({}); rebuilding by scanning the file", e);
            self.rebuild_by_scan()?;
            self.ensure_root()?;
        }

        Ok(())
    }

    /// Walks the `/Prev` chain, newest revision first.
    fn read_revision_chain(&mut self, start: usize) -> PDFResult<()> {
        let mut visited = FxHashSet::default();
        let mut next = Some(start);

        while let Some(offset) = next {
            if !visited.insert(offset) {
                return Err(PDFError::XRef(format!(
                    "/Prev chain loops back to offset {}",
                    offset
                )));
            }
            if visited.len() > self.max_revisions {
                return Err(PDFError::XRef(format!(
                    "more than {} xref sections",
                    self.max_revisions
                )));
            }

            let trailer = self.read_revision(offset)?;
            next = trailer
                .get("Prev")
                .and_then(PDFObject::as_int)
                .and_then(|prev| usize::try_from(prev).ok());

            if self.revision_count == 0 {
                self.trailer = trailer;
            }
            self.revision_count += 1;
            debug!("Read xref section at offset {}", offset);
        }

        Ok(())
    }

    /// Reads one revision (classic table or xref stream) at `offset`,
    /// merges its entries and returns its trailer dictionary.
    fn read_revision(&mut self, offset: usize) -> PDFResult<PDFDict> {
        if offset >= self.stream.end() {
            return Err(PDFError::XRef(format!(
                "xref offset {} is past the end of the file",
                offset
            )));
        }

        let mut parser = Parser::from_stream(self.stream.make_tail_stream(offset)?)?;
        if !parser.get_object()?.is_command("xref") {
            let (entries, dict) = self.read_xref_stream(offset)?;
            let mut section = FxHashMap::default();
            for (num, entry) in entries {
                section.entry(num).or_insert(entry);
            }
            self.merge(section);
            return Ok(dict);
        }

        let mut section = Self::read_xref_table(&mut parser)?;
        let trailer = match parser.get_object()? {
            PDFObject::Dictionary(dict) => dict,
            other => {
                return Err(PDFError::XRef(format!(
                    "Expected trailer dictionary, got {:?}",
                    other
                )));
            }
        };

        // Hybrid file: the table wins, but a free table slot does not hide
        // an object that only the companion stream knows about.
        if let Some(stm_offset) = trailer
            .get("XRefStm")
            .and_then(PDFObject::as_int)
            .and_then(|o| usize::try_from(o).ok())
        {
            match self.read_xref_stream(stm_offset) {
                Ok((stream_entries, _)) => {
                    debug!("Merging /XRefStm at offset {}", stm_offset);
                    for (num, entry) in stream_entries {
                        let replace = match section.get(&num) {
                            None => true,
                            Some(existing) => existing.is_free() && !entry.is_free(),
                        };
                        if replace {
                            section.insert(num, entry);
                        }
                    }
                }
                Err(e) => warn!("Ignoring unreadable /XRefStm at {}: {}", stm_offset, e),
            }
        }

        self.merge(section);
        Ok(trailer)
    }

    /// Adds a revision's entries without overriding newer ones.
    fn merge(&mut self, section: FxHashMap<u32, XRefEntry>) {
        for (num, entry) in section {
            self.entries.entry(num).or_insert(entry);
        }
    }

    /// Reads xref table subsections, up to and including the `trailer`
    /// keyword.
    ///
    /// Example xref table format:
    /// ```text
    /// xref
    /// 0 6
    /// 0000000000 65535 f
    /// 0000000015 00000 n
    /// trailer
    /// ```
    fn read_xref_table(parser: &mut Parser) -> PDFResult<FxHashMap<u32, XRefEntry>> {
        let mut section = FxHashMap::default();

        loop {
            let obj = parser.get_object()?;
            if obj.is_command("trailer") {
                return Ok(section);
            }

            let mut first = obj
                .as_int()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| {
                    PDFError::XRef(format!(
                        "Expected subsection start number or 'trailer', got {:?}",
                        obj
                    ))
                })?;
            let count_obj = parser.get_object()?;
            let count = count_obj
                .as_int()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| {
                    PDFError::XRef(format!("Expected subsection count, got {:?}", count_obj))
                })?;

            for i in 0..count {
                let entry = Self::read_xref_entry(parser)?;

                // Some producers number the first subsection from 1 while
                // still writing the free list head first.
                if i == 0
                    && first == 1
                    && entry
                        == (XRefEntry::Free {
                            next_free: 0,
                            generation: 65535,
                        })
                {
                    first = 0;
                }

                section.entry(first.saturating_add(i)).or_insert(entry);
            }
        }
    }

    /// Reads a single xref entry.
    ///
    /// Format: offset generation type
    /// Example: 0000000015 00000 n
    fn read_xref_entry(parser: &mut Parser) -> PDFResult<XRefEntry> {
        let offset_obj = parser.get_object()?;
        let offset = offset_obj
            .as_int()
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| {
                PDFError::XRef(format!("Expected offset in xref entry, got {:?}", offset_obj))
            })?;

        let gen_obj = parser.get_object()?;
        let generation = gen_obj
            .as_int()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| {
                PDFError::XRef(format!("Expected generation in xref entry, got {:?}", gen_obj))
            })?;

        match parser.get_object()? {
            PDFObject::Command(kind) if kind == "f" => Ok(XRefEntry::Free {
                next_free: offset,
                generation,
            }),
            PDFObject::Command(kind) if kind == "n" => {
                Ok(XRefEntry::Uncompressed { offset, generation })
            }
            other => Err(PDFError::XRef(format!(
                "Expected 'f' or 'n' in xref entry, got {:?}",
                other
            ))),
        }
    }

    /// Reads the cross-reference stream object at `offset`.
    ///
    /// Returns its entries in stream order and its dictionary, which doubles
    /// as the revision's trailer.
    fn read_xref_stream(&mut self, offset: usize) -> PDFResult<(Vec<(u32, XRefEntry)>, PDFDict)> {
        let mut parser = Parser::from_stream(self.stream.make_tail_stream(offset)?)?;
        let (r, obj) = parser.parse_indirect_object()?;
        if !obj.has_type("XRef") {
            return Err(PDFError::XRef(format!(
                "object {} at offset {} is not an xref stream",
                r, offset
            )));
        }
        let dict = obj
            .as_dict()
            .ok_or_else(|| PDFError::XRef("xref stream has no dictionary".to_string()))?;

        let widths: Vec<usize> = dict
            .get("W")
            .and_then(PDFObject::as_array)
            .map(|w| {
                w.iter()
                    .map(|v| v.as_int().and_then(|n| usize::try_from(n).ok()).unwrap_or(0))
                    .collect()
            })
            .unwrap_or_default();
        if widths.len() < 3 || widths.iter().any(|w| *w > 8) {
            return Err(PDFError::XRef(format!("invalid /W {:?} in xref stream", widths)));
        }
        let entry_len: usize = widths[..3].iter().sum();
        if entry_len == 0 {
            return Err(PDFError::XRef("xref stream /W has zero width".to_string()));
        }

        let size = dict
            .get("Size")
            .and_then(PDFObject::as_int)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0);
        let subsections: Vec<(u32, u32)> = match dict.get("Index").and_then(PDFObject::as_array) {
            Some(index) => index
                .chunks_exact(2)
                .filter_map(|pair| {
                    let first = u32::try_from(pair[0].as_int()?).ok()?;
                    let count = u32::try_from(pair[1].as_int()?).ok()?;
                    Some((first, count))
                })
                .collect(),
            None => vec![(0, size)],
        };

        let data = decode_stream_object(&obj)?;
        let mut rows = data.chunks_exact(entry_len);
        let mut entries = Vec::new();

        'sections: for (first, count) in subsections {
            for i in 0..count {
                let Some(row) = rows.next() else {
                    warn!("xref stream at {} ends before its /Index is exhausted", offset);
                    break 'sections;
                };
                let (type_field, rest) = row.split_at(widths[0]);
                let (field2, field3) = rest.split_at(widths[1]);

                // A zero-width type field means every entry is in use
                let kind = if widths[0] == 0 {
                    1
                } else {
                    read_be_int(type_field)
                };
                let field2 = read_be_int(field2);
                let field3 = read_be_int(field3);

                let entry = match kind {
                    0 => XRefEntry::Free {
                        next_free: field2,
                        generation: field3 as u32,
                    },
                    1 => XRefEntry::Uncompressed {
                        offset: field2,
                        generation: field3 as u32,
                    },
                    2 => XRefEntry::Compressed {
                        obj_stream_num: field2 as u32,
                        index: field3 as u32,
                    },
                    // Unknown types are references to the null object
                    _ => continue,
                };
                entries.push((first.saturating_add(i), entry));
            }
        }

        Ok((entries, dict.clone()))
    }

    /// Makes sure the trailer names a catalog dictionary, falling back to a
    /// search over known objects for `/Type /Catalog`.
    fn ensure_root(&mut self) -> PDFResult<()> {
        if let Some(root) = self.trailer.get("Root").and_then(PDFObject::as_ref) {
            if matches!(self.fetch(root).as_deref(), Ok(PDFObject::Dictionary(_))) {
                return Ok(());
            }
            warn!("Trailer /Root {} is not a dictionary", root);
        }

        match self.find_catalog() {
            Some(root) => {
                debug!("Using catalog found by search: {}", root);
                self.trailer.insert("Root".to_string(), PDFObject::Ref(root));
                Ok(())
            }
            None => Err(PDFError::MissingCatalog),
        }
    }

    /// Searches known objects for the last `/Type /Catalog` dictionary.
    fn find_catalog(&mut self) -> Option<Ref> {
        let mut candidates: Vec<(u32, XRefEntry)> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_free())
            .map(|(num, entry)| (*num, entry.clone()))
            .collect();
        candidates.sort_by_key(|(num, _)| *num);

        let mut found = None;
        for (num, entry) in candidates {
            if let XRefEntry::Uncompressed { offset, .. } = entry {
                if !self.window_contains(offset as usize, b"/Catalog") {
                    continue;
                }
            }
            let r = Ref::new(num, entry.generation());
            if let Ok(obj) = self.fetch(r) {
                if matches!(obj.as_ref(), PDFObject::Dictionary(_)) && obj.has_type("Catalog") {
                    found = Some(r);
                }
            }
        }
        found
    }

    /// Returns true if `marker` occurs within the first 1 KiB at `offset`.
    fn window_contains(&self, offset: usize, marker: &[u8]) -> bool {
        let end = offset.saturating_add(1024).min(self.stream.end());
        match self.stream.get_byte_range(offset.min(end), end) {
            Ok(window) => find_marker(&window, 0, marker).is_some(),
            Err(_) => false,
        }
    }

    /// Rebuilds the map by scanning every byte of the file for object
    /// headers. The last occurrence of an object number wins, matching
    /// the on-disk order of incremental updates.
    fn rebuild_by_scan(&mut self) -> PDFResult<()> {
        let base = self.stream.start();
        let bytes = self.stream.get_byte_range(base, self.stream.end())?;

        self.entries.clear();
        self.cache.clear();
        self.object_streams.clear();
        self.trailer = PDFDict::default();

        let mut pos = 0;
        while let Some(idx) = find_marker(&bytes, pos, b"obj") {
            pos = idx + 3;
            if bytes
                .get(idx + 3)
                .is_some_and(|b| !Lexer::is_whitespace(*b as i32) && !Lexer::is_delimiter(*b as i32))
            {
                continue;
            }
            if let Some((num, generation, start)) = object_header_before(&bytes, idx) {
                self.entries.insert(
                    num,
                    XRefEntry::Uncompressed {
                        offset: (base + start) as u64,
                        generation,
                    },
                );
            }
        }

        // Trailer candidates: classic trailers and xref stream dictionaries
        let mut trailers: Vec<(usize, PDFDict)> = Vec::new();
        let mut pos = 0;
        while let Some(idx) = find_marker(&bytes, pos, b"trailer") {
            pos = idx + 7;
            let parsed = self
                .stream
                .make_tail_stream(base + pos)
                .and_then(Parser::from_stream)
                .and_then(|mut parser| parser.get_object());
            if let Ok(PDFObject::Dictionary(dict)) = parsed {
                trailers.push((idx, dict));
            }
        }

        let mut objects: Vec<(u32, u32, usize)> = self
            .entries
            .iter()
            .filter_map(|(num, entry)| match entry {
                XRefEntry::Uncompressed { offset, generation } => {
                    Some((*num, *generation, *offset as usize))
                }
                _ => None,
            })
            .collect();
        objects.sort_by_key(|(_, _, offset)| *offset);

        for (num, generation, offset) in objects {
            if !self.window_contains(offset, b"/ObjStm") && !self.window_contains(offset, b"/XRef") {
                continue;
            }
            let Ok(obj) = self.parse_uncompressed(Ref::new(num, generation), offset) else {
                continue;
            };
            if obj.has_type("XRef") {
                if let Some(dict) = obj.as_dict() {
                    trailers.push((offset - base, dict.clone()));
                }
            } else if obj.has_type("ObjStm") {
                match self.decode_object_stream(&obj) {
                    Ok(object_stream) => {
                        for (index, (member, _)) in object_stream.members.iter().enumerate() {
                            self.entries.entry(*member).or_insert(XRefEntry::Compressed {
                                obj_stream_num: num,
                                index: index as u32,
                            });
                        }
                        self.object_streams.insert(num, Arc::new(object_stream));
                    }
                    Err(e) => warn!("Skipping unreadable object stream {}: {}", num, e),
                }
            }
        }

        trailers.sort_by_key(|(offset, _)| *offset);
        let chosen = trailers
            .iter()
            .rposition(|(_, dict)| dict.contains_key("Root"))
            .or_else(|| trailers.len().checked_sub(1));
        if let Some(idx) = chosen {
            self.trailer = trailers.swap_remove(idx).1;
        }

        self.revision_count = 1;
        self.recovered = true;
        warn!("Rebuilt xref by scanning: {} objects", self.entries.len());
        Ok(())
    }

    /// Reads the linearization dictionary, if the file opens with one.
    fn detect_linearized(&self) -> Option<LinearizedInfo> {
        let start = self.stream.start();
        let head_end = (start + 1024).min(self.stream.end());
        let head = self.stream.get_byte_range(start, head_end).ok()?;
        find_marker(&head, 0, b"/Linearized")?;

        let mut parser = Parser::from_stream(self.stream.make_tail_stream(start).ok()?).ok()?;
        let (_, obj) = parser.parse_indirect_object().ok()?;
        obj.dict_get("Linearized")?;

        let int = |key: &str| {
            obj.dict_get(key)
                .and_then(PDFObject::as_int)
                .unwrap_or(0)
                .max(0)
        };
        Some(LinearizedInfo {
            file_length: int("L") as u64,
            first_page_object: int("O") as u32,
            page_count: int("N") as u32,
            main_xref_offset: int("T") as u64,
        })
    }

    /// Gets an entry from the xref table.
    pub fn get_entry(&self, obj_num: u32) -> Option<&XRefEntry> {
        self.entries.get(&obj_num)
    }

    /// Fetches an indirect object by reference.
    ///
    /// The generation must match the entry; free and unknown entries are
    /// errors. Parsed objects are cached, so a second fetch returns the
    /// same allocation.
    pub fn fetch(&mut self, r: Ref) -> PDFResult<Arc<PDFObject>> {
        if let Some(cached) = self.cache.get(&r) {
            return Ok(Arc::clone(cached));
        }

        let entry = self
            .entries
            .get(&r.num)
            .cloned()
            .ok_or_else(|| PDFError::XRef(format!("Object {} not found in xref", r)))?;

        if entry.is_free() {
            return Err(PDFError::XRef(format!("Object {} is free", r)));
        }
        if entry.generation() != r.generation {
            return Err(PDFError::XRef(format!(
                "Generation mismatch for {}: xref has generation {}",
                r,
                entry.generation()
            )));
        }
        if !self.in_progress.insert(r) {
            return Err(PDFError::XRef(format!("Object {} refers to itself", r)));
        }

        let parsed = match entry {
            XRefEntry::Uncompressed { offset, .. } => self.parse_uncompressed(r, offset as usize),
            XRefEntry::Compressed {
                obj_stream_num,
                index,
            } => self.parse_compressed(r, obj_stream_num, index),
            XRefEntry::Free { .. } => Err(PDFError::XRef(format!("Object {} is free", r))),
        };
        self.in_progress.remove(&r);

        let object = Arc::new(parsed?);
        self.cache.insert(r, Arc::clone(&object));
        Ok(object)
    }

    /// Parses the `n g obj` record at `offset`.
    ///
    /// An indirect `/Length` is resolved through this table and the record
    /// parsed again; if it cannot be resolved the payload is found by
    /// scanning for `endstream`.
    fn parse_uncompressed(&mut self, r: Ref, offset: usize) -> PDFResult<PDFObject> {
        let mut known_length: Option<(Ref, usize)> = None;

        for attempt in 0..2 {
            let mut parser = Parser::from_stream(self.stream.make_tail_stream(offset)?)?;
            parser.set_defer_ref_lengths(attempt == 0);
            if let Some((length_ref, length)) = known_length {
                parser.set_stream_length(length_ref, length);
            }

            match parser.parse_indirect_object() {
                Ok((found, object)) => {
                    if found.num != r.num {
                        return Err(PDFError::XRef(format!(
                            "Expected object {} at offset {}, found {}",
                            r, offset, found
                        )));
                    }
                    return Ok(object);
                }
                Err(PDFError::StreamLengthDeferred(length_ref)) => {
                    known_length = self
                        .fetch(length_ref)
                        .ok()
                        .and_then(|len| len.as_int())
                        .and_then(|len| usize::try_from(len).ok())
                        .map(|len| (length_ref, len));
                    if known_length.is_none() {
                        warn!("Unresolvable /Length {} for {}; scanning for endstream", length_ref, r);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(PDFError::XRef(format!("Could not parse object {}", r)))
    }

    /// Parses a member of an object stream.
    fn parse_compressed(&mut self, r: Ref, stream_num: u32, index: u32) -> PDFResult<PDFObject> {
        let object_stream = self.object_stream(stream_num)?;
        let offset = object_stream
            .members
            .get(index as usize)
            .filter(|(num, _)| *num == r.num)
            .or_else(|| object_stream.members.iter().find(|(num, _)| *num == r.num))
            .map(|(_, offset)| *offset)
            .ok_or_else(|| {
                PDFError::XRef(format!("Object {} not found in object stream {}", r, stream_num))
            })?;

        let stream = Stream::from_shared(Arc::clone(&object_stream.data))
            .make_tail_stream(object_stream.first + offset)?;
        Parser::from_stream(stream)?.get_object()
    }

    /// Returns the decoded object stream `num`, decoding it on first use.
    fn object_stream(&mut self, num: u32) -> PDFResult<Arc<ObjectStream>> {
        if let Some(object_stream) = self.object_streams.get(&num) {
            return Ok(Arc::clone(object_stream));
        }

        let generation = match self.entries.get(&num) {
            Some(XRefEntry::Uncompressed { generation, .. }) => *generation,
            _ => {
                return Err(PDFError::XRef(format!(
                    "Object stream {} is not stored uncompressed",
                    num
                )));
            }
        };
        let container = self.fetch(Ref::new(num, generation))?;
        if !container.has_type("ObjStm") {
            warn!("Object stream {} lacks /Type /ObjStm", num);
        }

        let object_stream = Arc::new(self.decode_object_stream(&container)?);
        debug!(
            "Opened object stream {} with {} members",
            num,
            object_stream.members.len()
        );
        self.object_streams.insert(num, Arc::clone(&object_stream));
        Ok(object_stream)
    }

    /// Decodes an object stream and reads its `/N` header pairs.
    fn decode_object_stream(&mut self, container: &PDFObject) -> PDFResult<ObjectStream> {
        let int = |key: &str| {
            container
                .dict_get(key)
                .and_then(PDFObject::as_int)
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| PDFError::XRef(format!("Object stream has no valid /{}", key)))
        };
        let count = int("N")?;
        let first = int("First")?;

        let data = Arc::new(self.decode_stream(container)?);
        let header = Stream::from_shared(Arc::clone(&data)).make_sub_stream(0, first.min(data.len()))?;
        let mut parser = Parser::from_stream(header)?;

        let mut members = Vec::new();
        for _ in 0..count {
            let num = parser.get_object()?.as_int().and_then(|n| u32::try_from(n).ok());
            let offset = parser.get_object()?.as_int().and_then(|n| usize::try_from(n).ok());
            match (num, offset) {
                (Some(num), Some(offset)) => members.push((num, offset)),
                _ => {
                    warn!("Object stream header ends after {} of {} members", members.len(), count);
                    break;
                }
            }
        }

        Ok(ObjectStream {
            data,
            first,
            members,
        })
    }

    /// Decodes a stream object's payload, resolving an indirect `/Filter`
    /// or `/DecodeParms` first.
    pub fn decode_stream(&mut self, obj: &PDFObject) -> PDFResult<Vec<u8>> {
        let PDFObject::Stream { dict, data } = obj else {
            return Err(PDFError::Generic("Object is not a stream".to_string()));
        };
        let Some(filters) = dict.get("Filter") else {
            return Ok(data.clone());
        };

        let filters = self.resolve_shallow(filters);
        let parms = dict.get("DecodeParms").map(|p| self.resolve_shallow(p));
        apply_filters(data, &filters, parms.as_ref())
    }

    /// Resolves a reference, or the references directly inside an array,
    /// substituting Null for anything unresolvable.
    fn resolve_shallow(&mut self, obj: &PDFObject) -> PDFObject {
        match obj {
            PDFObject::Ref(r) => self.fetch(*r).map(|o| (*o).clone()).unwrap_or(PDFObject::Null),
            PDFObject::Array(items) => PDFObject::Array(
                items
                    .iter()
                    .map(|item| match item {
                        PDFObject::Ref(r) => {
                            self.fetch(*r).map(|o| (*o).clone()).unwrap_or(PDFObject::Null)
                        }
                        other => other.clone(),
                    })
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Fetches an object if it's a reference, otherwise returns the object as-is.
    pub fn fetch_if_ref(&mut self, obj: &PDFObject) -> PDFResult<PDFObject> {
        match obj {
            PDFObject::Ref(r) => Ok((*self.fetch(*r)?).clone()),
            _ => Ok(obj.clone()),
        }
    }

    /// Returns the trailer dictionary of the newest revision.
    pub fn trailer(&self) -> &PDFDict {
        &self.trailer
    }

    /// Returns the catalog (root) dictionary.
    pub fn catalog(&mut self) -> PDFResult<Arc<PDFObject>> {
        match self.trailer.get("Root") {
            Some(PDFObject::Ref(root)) => {
                let root = *root;
                self.fetch(root)
            }
            Some(PDFObject::Dictionary(dict)) => Ok(Arc::new(PDFObject::Dictionary(dict.clone()))),
            _ => Err(PDFError::MissingCatalog),
        }
    }

    /// Returns the linearization parameters, if the file is linearized.
    pub fn linearized(&self) -> Option<&LinearizedInfo> {
        self.linearized.as_ref()
    }

    /// Number of xref sections merged (1 after a recovery scan).
    pub fn revision_count(&self) -> usize {
        self.revision_count
    }

    /// Returns true if the map was rebuilt by scanning.
    pub fn is_recovered(&self) -> bool {
        self.recovered
    }

    /// Object numbers of all in-use entries, ascending.
    pub fn object_numbers(&self) -> Vec<u32> {
        let mut nums: Vec<u32> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_free())
            .map(|(num, _)| *num)
            .collect();
        nums.sort_unstable();
        nums
    }

    /// Returns the number of entries in the xref table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the xref table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Reads a big-endian unsigned integer of up to 8 bytes.
fn read_be_int(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)
}

/// Finds `marker` in `haystack` at or after `from`.
fn find_marker(haystack: &[u8], from: usize, marker: &[u8]) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(marker.len())
        .position(|window| window == marker)
        .map(|idx| from + idx)
}

/// Given the index of an `obj` keyword, walks back over `num gen` and
/// returns (num, gen, offset of num).
fn object_header_before(bytes: &[u8], obj_idx: usize) -> Option<(u32, u32, usize)> {
    let is_ws = |b: u8| Lexer::is_whitespace(b as i32);
    let mut i = obj_idx;

    while i > 0 && is_ws(bytes[i - 1]) {
        i -= 1;
    }
    let gen_end = i;
    while i > 0 && bytes[i - 1].is_ascii_digit() {
        i -= 1;
    }
    if i == gen_end {
        return None;
    }
    let gen_start = i;

    while i > 0 && is_ws(bytes[i - 1]) {
        i -= 1;
    }
    if i == gen_start {
        return None;
    }
    let num_end = i;
    while i > 0 && bytes[i - 1].is_ascii_digit() {
        i -= 1;
    }
    if i == num_end {
        return None;
    }
    if i > 0 && !is_ws(bytes[i - 1]) && !Lexer::is_delimiter(bytes[i - 1] as i32) {
        return None;
    }

    let num = std::str::from_utf8(&bytes[i..num_end]).ok()?.parse().ok()?;
    let generation = std::str::from_utf8(&bytes[gen_start..gen_end])
        .ok()?
        .parse()
        .ok()?;
    Some((num, generation, i))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal file builder that records object offsets.
    struct Builder {
        buf: Vec<u8>,
        offsets: Vec<(u32, usize)>,
    }

    impl Builder {
        fn new() -> Self {
            Builder {
                buf: b"%PDF-1.5\n".to_vec(),
                offsets: Vec::new(),
            }
        }

        fn obj(&mut self, num: u32, body: &str) -> usize {
            self.obj_bytes(num, body.as_bytes())
        }

        fn obj_bytes(&mut self, num: u32, body: &[u8]) -> usize {
            let offset = self.buf.len();
            self.buf.extend_from_slice(format!("{} 0 obj\n", num).as_bytes());
            self.buf.extend_from_slice(body);
            self.buf.extend_from_slice(b"\nendobj\n");
            self.offsets.push((num, offset));
            offset
        }

        fn stream(&mut self, num: u32, dict: &str, data: &[u8]) -> usize {
            let mut body = format!("<< {} /Length {} >>\nstream\n", dict, data.len()).into_bytes();
            body.extend_from_slice(data);
            body.extend_from_slice(b"\nendstream");
            self.obj_bytes(num, &body)
        }

        /// Writes a classic table covering the given objects.
        fn table(&mut self, objects: &[(u32, usize)], trailer: &str) -> usize {
            let offset = self.buf.len();
            let mut text = String::from("xref\n0 1\n0000000000 65535 f \n");
            for (num, obj_offset) in objects {
                text.push_str(&format!("{} 1\n{:010} 00000 n \n", num, obj_offset));
            }
            text.push_str(&format!("trailer\n{}\n", trailer));
            self.buf.extend_from_slice(text.as_bytes());
            offset
        }

        fn finish(mut self, startxref: usize) -> Vec<u8> {
            self.buf
                .extend_from_slice(format!("startxref\n{}\n%%EOF\n", startxref).as_bytes());
            self.buf
        }
    }

    /// Packs xref stream rows with /W [1 4 2].
    fn xref_rows(rows: &[(u8, u64, u16)]) -> Vec<u8> {
        let mut data = Vec::new();
        for (kind, field2, field3) in rows {
            data.push(*kind);
            data.extend_from_slice(&(*field2 as u32).to_be_bytes());
            data.extend_from_slice(&field3.to_be_bytes());
        }
        data
    }

    fn open(bytes: Vec<u8>, startxref: Option<usize>, options: &ReaderOptions) -> PDFResult<XRef> {
        let mut xref = XRef::new(Box::new(Stream::from_bytes(bytes)), options);
        xref.parse(startxref)?;
        Ok(xref)
    }

    fn classic() -> (Vec<u8>, usize) {
        let mut b = Builder::new();
        let o1 = b.obj(1, "<< /Type /Catalog /Pages 2 0 R >>");
        let o2 = b.obj(2, "<< /Type /Pages /Kids [] /Count 0 >>");
        let o3 = b.obj(3, "42");
        let xref = b.table(&[(1, o1), (2, o2), (3, o3)], "<< /Size 4 /Root 1 0 R >>");
        (b.finish(xref), xref)
    }

    #[test]
    fn test_xref_entry_is_free() {
        let free_entry = XRefEntry::Free {
            next_free: 0,
            generation: 65535,
        };
        assert!(free_entry.is_free());
        assert_eq!(free_entry.generation(), 65535);

        let compressed = XRefEntry::Compressed {
            obj_stream_num: 9,
            index: 2,
        };
        assert!(!compressed.is_free());
        assert_eq!(compressed.generation(), 0);
    }

    #[test]
    fn test_parse_classic_table() {
        let (bytes, startxref) = classic();
        let mut xref = open(bytes, Some(startxref), &ReaderOptions::default()).unwrap();

        assert!(!xref.is_recovered());
        assert_eq!(xref.revision_count(), 1);
        assert!(xref.get_entry(0).unwrap().is_free());
        assert_eq!(xref.object_numbers(), vec![1, 2, 3]);
        assert_eq!(*xref.fetch(Ref::new(3, 0)).unwrap(), PDFObject::Integer(42));
        assert!(xref.catalog().unwrap().has_type("Catalog"));
    }

    #[test]
    fn test_fetch_is_cached() {
        let (bytes, startxref) = classic();
        let mut xref = open(bytes, Some(startxref), &ReaderOptions::default()).unwrap();
        let first = xref.fetch(Ref::new(2, 0)).unwrap();
        let second = xref.fetch(Ref::new(2, 0)).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_fetch_generation_mismatch_and_missing() {
        let (bytes, startxref) = classic();
        let mut xref = open(bytes, Some(startxref), &ReaderOptions::default()).unwrap();
        assert!(xref.fetch(Ref::new(3, 1)).is_err());
        assert!(xref.fetch(Ref::new(0, 65535)).is_err());
        assert!(xref.fetch(Ref::new(99, 0)).is_err());
    }

    #[test]
    fn test_fetch_if_ref() {
        let (bytes, startxref) = classic();
        let mut xref = open(bytes, Some(startxref), &ReaderOptions::default()).unwrap();
        let resolved = xref.fetch_if_ref(&PDFObject::Ref(Ref::new(3, 0))).unwrap();
        assert_eq!(resolved, PDFObject::Integer(42));
        let direct = xref.fetch_if_ref(&PDFObject::Real(1.5)).unwrap();
        assert_eq!(direct, PDFObject::Real(1.5));
    }

    #[test]
    fn test_subsection_numbered_from_one() {
        let mut b = Builder::new();
        let o1 = b.obj(1, "<< /Type /Catalog >>");
        let xref = b.buf.len();
        let table = format!(
            "xref\n1 2\n0000000000 65535 f \n{:010} 00000 n \ntrailer\n<< /Size 2 /Root 1 0 R >>\n",
            o1
        );
        b.buf.extend_from_slice(table.as_bytes());
        let bytes = b.finish(xref);

        let xref = open(bytes, Some(xref), &ReaderOptions::default()).unwrap();
        assert!(xref.get_entry(0).unwrap().is_free());
        assert!(!xref.get_entry(1).unwrap().is_free());
    }

    #[test]
    fn test_xref_stream_with_object_stream() {
        let mut b = Builder::new();
        let o1 = b.obj(1, "<< /Type /Catalog /Pages 2 0 R >>");
        // Object stream 5 holds objects 2 and 3
        let members = b"2 0 3 37 << /Type /Pages /Kids [] /Count 0 >> (packed)";
        let header_len = "2 0 3 37 ".len();
        let o5 = b.stream(5, &format!("/Type /ObjStm /N 2 /First {}", header_len), members);
        let rows = xref_rows(&[
            (0, 0, 65535),
            (1, o1 as u64, 0),
            (2, 5, 0),
            (2, 5, 1),
            (0, 0, 0),
            (1, o5 as u64, 0),
        ]);
        let xref_offset = b.buf.len();
        b.stream(6, "/Type /XRef /Size 6 /W [1 4 2] /Root 1 0 R", &rows);
        let bytes = b.finish(xref_offset);

        let mut xref = open(bytes, Some(xref_offset), &ReaderOptions::default()).unwrap();
        assert_eq!(
            xref.get_entry(3),
            Some(&XRefEntry::Compressed {
                obj_stream_num: 5,
                index: 1
            })
        );
        assert!(xref.fetch(Ref::new(2, 0)).unwrap().has_type("Pages"));
        assert_eq!(
            *xref.fetch(Ref::new(3, 0)).unwrap(),
            PDFObject::String(b"packed".to_vec())
        );
    }

    #[test]
    fn test_xref_stream_index_and_zero_type_width() {
        let mut b = Builder::new();
        let o1 = b.obj(1, "<< /Type /Catalog >>");
        let o7 = b.obj(7, "(seven)");
        let mut rows = Vec::new();
        for offset in [o1, o7] {
            rows.extend_from_slice(&(offset as u32).to_be_bytes());
            rows.push(0);
        }
        let xref_offset = b.buf.len();
        b.stream(8, "/Type /XRef /Size 9 /W [0 4 1] /Index [1 1 7 1] /Root 1 0 R", &rows);
        let bytes = b.finish(xref_offset);

        let mut xref = open(bytes, Some(xref_offset), &ReaderOptions::default()).unwrap();
        assert_eq!(xref.object_numbers(), vec![1, 7]);
        assert_eq!(
            *xref.fetch(Ref::new(7, 0)).unwrap(),
            PDFObject::String(b"seven".to_vec())
        );
    }

    #[test]
    fn test_hybrid_table_wins_except_free_slots() {
        let mut b = Builder::new();
        let o1 = b.obj(1, "<< /Type /Catalog >>");
        let o2_old = b.obj(2, "(from stream)");
        let o2_new = b.obj(2, "(from table)");
        let o3 = b.obj(3, "(only in stream)");
        let rows = xref_rows(&[
            (1, o1 as u64, 0),
            (1, o2_old as u64, 0),
            (1, o3 as u64, 0),
        ]);
        let stm = b.buf.len();
        b.stream(4, "/Type /XRef /Size 4 /W [1 4 2] /Index [1 3]", &rows);

        let xref_offset = b.buf.len();
        let table = format!(
            "xref\n0 4\n0000000000 65535 f \n{:010} 00000 n \n{:010} 00000 n \n0000000000 00000 f \ntrailer\n<< /Size 4 /Root 1 0 R /XRefStm {} >>\n",
            o1, o2_new, stm
        );
        b.buf.extend_from_slice(table.as_bytes());
        let bytes = b.finish(xref_offset);

        let mut xref = open(bytes, Some(xref_offset), &ReaderOptions::default()).unwrap();
        assert_eq!(
            *xref.fetch(Ref::new(2, 0)).unwrap(),
            PDFObject::String(b"from table".to_vec())
        );
        assert_eq!(
            *xref.fetch(Ref::new(3, 0)).unwrap(),
            PDFObject::String(b"only in stream".to_vec())
        );
    }

    #[test]
    fn test_prev_chain_newest_wins() {
        let mut b = Builder::new();
        let o1 = b.obj(1, "<< /Type /Catalog >>");
        let o2 = b.obj(2, "(old)");
        let first = b.table(&[(1, o1), (2, o2)], "<< /Size 3 /Root 1 0 R >>");
        let o2b = b.obj(2, "(new)");
        let second = b.table(&[(2, o2b)], &format!("<< /Size 3 /Root 1 0 R /Prev {} >>", first));
        let bytes = b.finish(second);

        let mut xref = open(bytes, Some(second), &ReaderOptions::default()).unwrap();
        assert_eq!(xref.revision_count(), 2);
        assert_eq!(
            *xref.fetch(Ref::new(2, 0)).unwrap(),
            PDFObject::String(b"new".to_vec())
        );
    }

    #[test]
    fn test_prev_cycle_falls_back_to_scan() {
        let mut b = Builder::new();
        let o1 = b.obj(1, "<< /Type /Catalog >>");
        let xref_offset = b.buf.len();
        let table = format!(
            "xref\n0 2\n0000000000 65535 f \n{:010} 00000 n \ntrailer\n<< /Size 2 /Root 1 0 R /Prev {} >>\n",
            o1, xref_offset
        );
        b.buf.extend_from_slice(table.as_bytes());
        let bytes = b.finish(xref_offset);

        let mut xref = open(bytes.clone(), Some(xref_offset), &ReaderOptions::default()).unwrap();
        assert!(xref.is_recovered());
        assert!(xref.catalog().unwrap().has_type("Catalog"));

        let strict = ReaderOptions::default().with_recover_xref(false);
        assert!(open(bytes, Some(xref_offset), &strict).is_err());
    }

    #[test]
    fn test_revision_limit() {
        let mut b = Builder::new();
        let o1 = b.obj(1, "<< /Type /Catalog >>");
        let first = b.table(&[(1, o1)], "<< /Size 2 /Root 1 0 R >>");
        let second = b.table(&[], &format!("<< /Size 2 /Root 1 0 R /Prev {} >>", first));
        let bytes = b.finish(second);

        let limited = ReaderOptions::default()
            .with_max_revisions(1)
            .with_recover_xref(false);
        assert!(open(bytes.clone(), Some(second), &limited).is_err());
        assert!(open(bytes, Some(second), &ReaderOptions::default()).is_ok());
    }

    #[test]
    fn test_scan_recovery_last_occurrence_wins() {
        let mut b = Builder::new();
        b.obj(1, "<< /Type /Catalog /Pages 2 0 R >>");
        b.obj(2, "(first)");
        b.obj(2, "(second)");
        b.buf.extend_from_slice(b"trailer\n<< /Size 3 /Root 1 0 R >>\n");
        let bytes = b.finish(999_999);

        let mut xref = open(bytes, Some(999_999), &ReaderOptions::default()).unwrap();
        assert!(xref.is_recovered());
        assert_eq!(xref.revision_count(), 1);
        assert_eq!(
            *xref.fetch(Ref::new(2, 0)).unwrap(),
            PDFObject::String(b"second".to_vec())
        );
    }

    #[test]
    fn test_scan_recovery_without_trailer_finds_catalog() {
        let mut b = Builder::new();
        b.obj(4, "<< /Type /Pages /Kids [] /Count 0 >>");
        b.obj(9, "<< /Type /Catalog /Pages 4 0 R >>");
        let bytes = b.finish(0);

        let mut xref = open(bytes, None, &ReaderOptions::default()).unwrap();
        assert_eq!(
            xref.trailer().get("Root"),
            Some(&PDFObject::Ref(Ref::new(9, 0)))
        );
        assert!(xref.catalog().unwrap().has_type("Catalog"));
    }

    #[test]
    fn test_scan_recovery_indexes_object_stream_members() {
        let mut b = Builder::new();
        let first_obj = "<< /Type /Catalog /Pages 2 0 R >> ";
        let header = format!("1 0 2 {} ", first_obj.len());
        let mut data = header.clone().into_bytes();
        data.extend_from_slice(first_obj.as_bytes());
        data.extend_from_slice(b"<< /Type /Pages /Kids [] /Count 0 >>");
        b.stream(7, &format!("/Type /ObjStm /N 2 /First {}", header.len()), &data);
        let bytes = b.finish(12345);

        let mut xref = open(bytes, Some(12345), &ReaderOptions::default()).unwrap();
        assert!(xref.is_recovered());
        assert_eq!(
            xref.get_entry(2),
            Some(&XRefEntry::Compressed {
                obj_stream_num: 7,
                index: 1
            })
        );
        assert!(xref.catalog().unwrap().has_type("Catalog"));
    }

    #[test]
    fn test_indirect_length_is_resolved() {
        let mut b = Builder::new();
        let o1 = b.obj(1, "<< /Type /Catalog >>");
        let o2 = b.obj_bytes(2, b"<< /Length 3 0 R >>\nstream\nBT ET endstream inside\nendstream");
        let o3 = b.obj(3, "22");
        let xref_offset = b.table(&[(1, o1), (2, o2), (3, o3)], "<< /Size 4 /Root 1 0 R >>");
        let bytes = b.finish(xref_offset);

        let mut xref = open(bytes, Some(xref_offset), &ReaderOptions::default()).unwrap();
        match xref.fetch(Ref::new(2, 0)).unwrap().as_ref() {
            PDFObject::Stream { data, .. } => assert_eq!(data, b"BT ET endstream inside"),
            other => panic!("Expected stream, got {:?}", other),
        }
    }

    #[test]
    fn test_linearized_detection() {
        let mut b = Builder::new();
        b.obj(10, "<< /Linearized 1 /L 5000 /O 12 /E 900 /N 5 /T 4100 /H [500 120] >>");
        let o1 = b.obj(1, "<< /Type /Catalog >>");
        let xref_offset = b.table(&[(1, o1)], "<< /Size 2 /Root 1 0 R >>");
        let bytes = b.finish(xref_offset);

        let xref = open(bytes, Some(xref_offset), &ReaderOptions::default()).unwrap();
        assert_eq!(
            xref.linearized(),
            Some(&LinearizedInfo {
                file_length: 5000,
                first_page_object: 12,
                page_count: 5,
                main_xref_offset: 4100,
            })
        );
    }

    #[test]
    fn test_object_header_before() {
        let bytes = b"xx 12 3 obj";
        assert_eq!(object_header_before(bytes, 8), Some((12, 3, 3)));
        assert_eq!(object_header_before(b"endobj", 3), None);
        assert_eq!(object_header_before(b"a12 0 obj", 6), None);
    }
}
