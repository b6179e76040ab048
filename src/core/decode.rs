/// Stream decoding and decompression utilities.
///
/// PDF streams can be compressed using various filters like FlateDecode.
/// A stream's `/Filter` is either one name or an array of names; each filter
/// is paired with the `/DecodeParms` entry at the same position and the
/// chain is applied in the order it is declared.
use super::error::{PDFError, PDFResult};
use super::parser::{PDFDict, PDFObject};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use log::{debug, warn};
use std::io::Read;

/// PNG predictor algorithm types (the per-row tag byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PngPredictor {
    /// No prediction
    None = 0,
    /// Sub - predicts from left pixel
    Sub = 1,
    /// Up - predicts from pixel above
    Up = 2,
    /// Average - predicts from average of left and above
    Average = 3,
    /// Paeth - uses Paeth predictor algorithm
    Paeth = 4,
}

impl PngPredictor {
    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(PngPredictor::None),
            1 => Some(PngPredictor::Sub),
            2 => Some(PngPredictor::Up),
            3 => Some(PngPredictor::Average),
            4 => Some(PngPredictor::Paeth),
            _ => None,
        }
    }
}

/// Predictor settings read from a `/DecodeParms` dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictorParams {
    pub predictor: i64,
    pub colors: usize,
    pub bits_per_component: usize,
    pub columns: usize,
}

impl Default for PredictorParams {
    fn default() -> Self {
        PredictorParams {
            predictor: 1,
            colors: 1,
            bits_per_component: 8,
            columns: 1,
        }
    }
}

impl PredictorParams {
    pub fn from_dict(parms: Option<&PDFDict>) -> Self {
        let mut params = PredictorParams::default();
        let Some(dict) = parms else {
            return params;
        };
        let get = |key: &str| dict.get(key).and_then(PDFObject::as_int);
        if let Some(p) = get("Predictor") {
            params.predictor = p;
        }
        if let Some(c) = get("Colors").filter(|c| *c > 0) {
            params.colors = c as usize;
        }
        if let Some(b) = get("BitsPerComponent").filter(|b| *b > 0) {
            params.bits_per_component = b as usize;
        }
        if let Some(c) = get("Columns").filter(|c| *c > 0) {
            params.columns = c as usize;
        }
        params
    }

    fn pixel_bytes(&self) -> PDFResult<usize> {
        self.colors
            .checked_mul(self.bits_per_component)
            .map(|bits| bits.div_ceil(8))
            .ok_or_else(|| self.too_large())
    }

    fn row_bytes(&self) -> PDFResult<usize> {
        self.columns
            .checked_mul(self.colors)
            .and_then(|n| n.checked_mul(self.bits_per_component))
            .map(|bits| bits.div_ceil(8))
            .ok_or_else(|| self.too_large())
    }

    fn too_large(&self) -> PDFError {
        PDFError::decode(
            "Predictor",
            format!(
                "row of {} columns x {} colors x {} bits does not fit",
                self.columns, self.colors, self.bits_per_component
            ),
        )
    }
}

/// Decodes a FlateDecode (zlib/deflate) compressed stream.
///
/// Falls back to raw deflate for producers that omit the zlib header, and
/// keeps whatever was inflated before a truncated or corrupt tail.
pub fn decode_flate(compressed_data: &[u8]) -> PDFResult<Vec<u8>> {
    let mut decompressed = Vec::new();
    let zlib_err = match ZlibDecoder::new(compressed_data).read_to_end(&mut decompressed) {
        Ok(_) => return Ok(decompressed),
        Err(e) => e,
    };

    let mut raw = Vec::new();
    match DeflateDecoder::new(compressed_data).read_to_end(&mut raw) {
        Ok(_) => Ok(raw),
        Err(deflate_err) if decompressed.is_empty() => Err(PDFError::decode(
            "FlateDecode",
            format!(
                "zlib failed ({}), raw deflate failed ({}); {} input bytes",
                zlib_err,
                deflate_err,
                compressed_data.len()
            ),
        )),
        Err(_) => {
            warn!(
                "FlateDecode stream is damaged ({}); keeping {} inflated bytes",
                zlib_err,
                decompressed.len()
            );
            Ok(decompressed)
        }
    }
}

/// Decodes LZW-compressed data (9 to 12 bit codes, MSB first).
///
/// With `early_change`, the code width grows one code earlier, which is the
/// PDF default.
pub fn decode_lzw(data: &[u8], early_change: bool) -> PDFResult<Vec<u8>> {
    const CLEAR: usize = 256;
    const EOD: usize = 257;

    let early = usize::from(early_change);
    let initial_table = || -> Vec<Vec<u8>> {
        let mut table: Vec<Vec<u8>> = (0..=255u8).map(|b| vec![b]).collect();
        table.push(Vec::new());
        table.push(Vec::new());
        table
    };

    let mut table = initial_table();
    let mut output = Vec::new();
    let mut code_len = 9u32;
    let mut prev: Option<usize> = None;
    let mut bit_buf = 0u32;
    let mut bits = 0u32;

    for &byte in data {
        bit_buf = (bit_buf << 8) | byte as u32;
        bits += 8;

        while bits >= code_len {
            let code = ((bit_buf >> (bits - code_len)) & ((1 << code_len) - 1)) as usize;
            bits -= code_len;
            bit_buf &= (1 << bits) - 1;

            if code == CLEAR {
                table = initial_table();
                code_len = 9;
                prev = None;
                continue;
            }
            if code == EOD {
                return Ok(output);
            }

            let entry = match (table.get(code), prev) {
                (Some(known), _) => known.clone(),
                // KwKwK case: the code being defined right now
                (None, Some(p)) if code == table.len() => {
                    let mut entry = table[p].clone();
                    entry.push(table[p][0]);
                    entry
                }
                _ => {
                    return Err(PDFError::decode(
                        "LZWDecode",
                        format!("invalid code {} (table size {})", code, table.len()),
                    ));
                }
            };

            output.extend_from_slice(&entry);
            if let Some(p) = prev {
                if table.len() < 4096 {
                    let mut added = table[p].clone();
                    added.push(entry[0]);
                    table.push(added);
                }
            }
            prev = Some(code);

            if code_len < 12 && table.len() + early >= (1 << code_len) {
                code_len += 1;
            }
        }
    }

    Ok(output)
}

/// Applies PNG predictor decoding (`/Predictor` 10-15) to decompressed data.
///
/// Every row carries its own tag byte, so the specific predictor value
/// only tells us that PNG prediction is in use. A short final row is
/// decoded as far as it goes.
pub fn decode_png_predictor(data: &[u8], params: &PredictorParams) -> PDFResult<Vec<u8>> {
    let pix_bytes = params.pixel_bytes()?;
    let row_bytes = params.row_bytes()?;
    let stride = row_bytes.saturating_add(1);

    // No decoded row can be longer than the input
    let row_len = row_bytes.min(data.len());
    let mut output = Vec::with_capacity(data.len());
    let mut prev_row = vec![0u8; row_len];
    let mut row = vec![0u8; row_len];

    for chunk in data.chunks(stride) {
        let Some(predictor) = PngPredictor::from_tag(chunk[0]) else {
            return Err(PDFError::decode(
                "Predictor",
                format!("unsupported PNG predictor tag {}", chunk[0]),
            ));
        };
        let raw = &chunk[1..];
        let len = raw.len();

        for i in 0..len {
            let left = if i >= pix_bytes { row[i - pix_bytes] } else { 0 };
            let up = prev_row[i];
            let up_left = if i >= pix_bytes { prev_row[i - pix_bytes] } else { 0 };

            let base = match predictor {
                PngPredictor::None => 0,
                PngPredictor::Sub => left,
                PngPredictor::Up => up,
                PngPredictor::Average => ((left as u16 + up as u16) / 2) as u8,
                PngPredictor::Paeth => {
                    let p = left as i32 + up as i32 - up_left as i32;
                    let pa = (p - left as i32).abs();
                    let pb = (p - up as i32).abs();
                    let pc = (p - up_left as i32).abs();
                    if pa <= pb && pa <= pc {
                        left
                    } else if pb <= pc {
                        up
                    } else {
                        up_left
                    }
                }
            };
            row[i] = base.wrapping_add(raw[i]);
        }

        output.extend_from_slice(&row[..len]);
        prev_row.copy_from_slice(&row);
    }

    Ok(output)
}

/// Applies TIFF predictor 2 (horizontal differencing).
pub fn decode_tiff_predictor(data: &[u8], params: &PredictorParams) -> PDFResult<Vec<u8>> {
    let row_bytes = params.row_bytes()?;
    let colors = params.colors;
    let mut output = data.to_vec();

    match params.bits_per_component {
        8 => {
            for row in output.chunks_mut(row_bytes) {
                for i in colors..row.len() {
                    row[i] = row[i].wrapping_add(row[i - colors]);
                }
            }
        }
        16 => {
            let step = params.pixel_bytes()?;
            for row in output.chunks_mut(row_bytes) {
                let mut i = step;
                while i + 1 < row.len() {
                    let prev = u16::from_be_bytes([row[i - step], row[i - step + 1]]);
                    let cur = u16::from_be_bytes([row[i], row[i + 1]]);
                    let [hi, lo] = cur.wrapping_add(prev).to_be_bytes();
                    row[i] = hi;
                    row[i + 1] = lo;
                    i += 2;
                }
            }
        }
        bpc => {
            return Err(PDFError::decode(
                "Predictor",
                format!("TIFF predictor with {} bits per component", bpc),
            ));
        }
    }

    Ok(output)
}

/// Undoes the predictor named in `params`, if any.
pub fn apply_predictor(data: Vec<u8>, params: &PredictorParams) -> PDFResult<Vec<u8>> {
    match params.predictor {
        1 => Ok(data),
        2 => decode_tiff_predictor(&data, params),
        10..=15 => decode_png_predictor(&data, params),
        other => Err(PDFError::decode(
            "Predictor",
            format!("unknown predictor {}", other),
        )),
    }
}

/// Decodes ASCIIHex-encoded data. Whitespace is ignored and `>` ends the data.
pub fn decode_ascii_hex(data: &[u8]) -> PDFResult<Vec<u8>> {
    let mut result = Vec::with_capacity(data.len() / 2);
    let mut pending: Option<u8> = None;

    for &byte in data {
        if byte == b'>' {
            break;
        }
        if byte.is_ascii_whitespace() || byte == 0 {
            continue;
        }
        let digit = match (byte as char).to_digit(16) {
            Some(d) => d as u8,
            None => {
                return Err(PDFError::decode(
                    "ASCIIHexDecode",
                    format!("invalid hex digit 0x{:02x}", byte),
                ));
            }
        };
        match pending.take() {
            Some(high) => result.push((high << 4) | digit),
            None => pending = Some(digit),
        }
    }

    // Odd number of hex digits: implicit trailing 0
    if let Some(high) = pending {
        result.push(high << 4);
    }

    Ok(result)
}

/// Decodes ASCII85 (Base85) encoded data.
pub fn decode_ascii85(data: &[u8]) -> PDFResult<Vec<u8>> {
    let data = data.strip_prefix(b"<~").unwrap_or(data);
    let mut result = Vec::with_capacity(data.len() * 4 / 5);
    let mut tuple = 0u64;
    let mut count = 0usize;

    for &byte in data {
        match byte {
            b'~' | b'>' => break,
            b'z' if count == 0 => result.extend_from_slice(&[0u8; 4]),
            b'z' => {
                return Err(PDFError::decode("ASCII85Decode", "'z' inside a group"));
            }
            b'!'..=b'u' => {
                tuple = tuple * 85 + (byte - b'!') as u64;
                count += 1;
                if count == 5 {
                    if tuple > u32::MAX as u64 {
                        return Err(PDFError::decode("ASCII85Decode", "group overflow"));
                    }
                    result.extend_from_slice(&(tuple as u32).to_be_bytes());
                    tuple = 0;
                    count = 0;
                }
            }
            b if b.is_ascii_whitespace() || b == 0 => {}
            b => {
                return Err(PDFError::decode(
                    "ASCII85Decode",
                    format!("invalid character 0x{:02x}", b),
                ));
            }
        }
    }

    // Partial final group: pad with 'u' and keep count - 1 bytes
    if count > 1 {
        for _ in count..5 {
            tuple = tuple * 85 + 84;
        }
        let bytes = (tuple.min(u32::MAX as u64) as u32).to_be_bytes();
        result.extend_from_slice(&bytes[..count - 1]);
    }

    Ok(result)
}

/// Decodes RunLengthDecode data.
pub fn decode_run_length(data: &[u8]) -> PDFResult<Vec<u8>> {
    let mut result = Vec::new();
    let mut i = 0;

    while i < data.len() {
        let length = data[i] as usize;
        i += 1;
        match length {
            128 => break,
            0..=127 => {
                let end = (i + length + 1).min(data.len());
                result.extend_from_slice(&data[i..end]);
                i = end;
            }
            _ => {
                let Some(&byte) = data.get(i) else {
                    break;
                };
                result.extend(std::iter::repeat_n(byte, 257 - length));
                i += 1;
            }
        }
    }

    Ok(result)
}

/// Applies a single filter to data.
fn apply_filter(data: &[u8], filter_name: &str, parms: Option<&PDFDict>) -> PDFResult<Vec<u8>> {
    match filter_name {
        "FlateDecode" | "Fl" => {
            let inflated = decode_flate(data)?;
            apply_predictor(inflated, &PredictorParams::from_dict(parms))
        }
        "LZWDecode" | "LZW" => {
            let early_change = parms
                .and_then(|p| p.get("EarlyChange"))
                .and_then(PDFObject::as_int)
                .is_none_or(|v| v != 0);
            let expanded = decode_lzw(data, early_change)?;
            apply_predictor(expanded, &PredictorParams::from_dict(parms))
        }
        "ASCIIHexDecode" | "AHx" => decode_ascii_hex(data),
        "ASCII85Decode" | "A85" => decode_ascii85(data),
        "RunLengthDecode" | "RL" => decode_run_length(data),
        _ => Err(PDFError::UnsupportedFilter(filter_name.to_string())),
    }
}

/// Picks the `/DecodeParms` dictionary for the filter at `index`.
fn parms_at(parms: Option<&PDFObject>, index: usize) -> Option<&PDFDict> {
    match parms? {
        PDFObject::Array(items) => items.get(index).and_then(PDFObject::as_dict),
        single if index == 0 => single.as_dict(),
        _ => None,
    }
}

/// Applies a filter chain to data, in declared order.
///
/// `filters` is the (already resolved) `/Filter` value; `parms` the
/// resolved `/DecodeParms` value, a dictionary for a single filter or an
/// array matched positionally against the filter array.
pub fn apply_filters(
    data: &[u8],
    filters: &PDFObject,
    parms: Option<&PDFObject>,
) -> PDFResult<Vec<u8>> {
    let filter_list: Vec<&str> = match filters {
        PDFObject::Name(name) => vec![name.as_str()],
        PDFObject::Array(arr) => arr.iter().filter_map(PDFObject::as_name).collect(),
        _ => return Ok(data.to_vec()),
    };

    debug!("Applying filters {:?}", filter_list);

    let mut current = data.to_vec();
    for (index, filter_name) in filter_list.iter().enumerate() {
        current = apply_filter(&current, filter_name, parms_at(parms, index))?;
    }

    Ok(current)
}

/// Decodes a stream object whose `/Filter` and `/DecodeParms` are direct.
///
/// Non-stream objects have no payload and decode to an error.
pub fn decode_stream_object(obj: &PDFObject) -> PDFResult<Vec<u8>> {
    match obj {
        PDFObject::Stream { dict, data } => {
            match dict.get("Filter") {
                Some(filters) => apply_filters(data, filters, dict.get("DecodeParms")),
                None => Ok(data.clone()),
            }
        }
        _ => Err(PDFError::Generic("Object is not a stream".to_string())),
    }
}
