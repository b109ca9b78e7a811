//! # Header Parser
//!
//! Builds a [`RegisterMap`] from a C header of annotated register defines:
//!
//! ```text
//! // Holding register (HREGS), SETTER+GETTER [0, 65535]
//! #define MY_DEFAULT_HREG    10    //< [0, 100000] Expected range
//! //                         10    //< lower part of uint32_t
//! //                         11    //< higher part of uint32_t
//! #define SECOND_REG_HREG    210   //< [volt] Another holding register
//! ```
//!
//! A comment line naming `(COILS)`, `(HREGS)`, `(ISTS)` or `(IREGS)` opens a
//! section. Defines are assigned to the open section; comment-only lines that
//! follow a define and cover `address + 1` turn it into a width-2 register.
//!
//! A leading `[...]` in the trailing comment is either a unit (`[sec]`) or an
//! inclusive range (`[0, 100]`, `[0..100]`, `[-10--5]`). Lines that cannot be
//! used are reported as [`ParseWarning`]s; parsing only fails when no
//! register survives.

use std::fmt;
use std::path::Path;

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use tracing::{debug, info, warn};

use crate::error::{ModbusError, ModbusResult};
use crate::register_map::{HeaderMeta, RegisterClass, RegisterDefinition, RegisterMap, RegisterRange};

/// Banner metadata is only looked for in the first lines of a header.
const BANNER_LINES: usize = 10;

lazy_static! {
    static ref SECTION_RE: Regex =
        Regex::new(r"^\s*//.*\((COILS|HREGS|ISTS|IREGS)\)").unwrap();
    static ref DEFINE_RE: Regex = Regex::new(
        r"^\s*#\s*define\s+([A-Za-z_]\w*)(?:\s+([^\s/]+))?\s*(?://[<!]?\s*(.*?))?\s*$"
    )
    .unwrap();
    static ref DEFINE_PREFIX_RE: Regex = Regex::new(r"^\s*#\s*define\b").unwrap();
    static ref CONTINUATION_RE: Regex =
        Regex::new(r"^\s*//\s*(?:([A-Za-z_]\w*)\s+)?(\d+)\b\s*(?://[<!]?)?\s*(.*?)\s*$").unwrap();
    static ref RANGE_RE: Regex =
        Regex::new(r"^\s*(-?\d+)\s*(?:,|\.\.|-)\s*(-?\d+)\s*$").unwrap();
    static ref SEPARATOR_RE: Regex = Regex::new(r",|\.\.|\w\s*-").unwrap();
    static ref CREATED_RE: Regex = Regex::new(r"Created\b.*?\bon\s+(.+?)\s*$").unwrap();
    static ref MODIFIED_RE: Regex = Regex::new(r"Modified on\s+(.+?)\s*$").unwrap();
}

/// Parser settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParserOptions {
    /// Assign defines outside any section by their `_COIL`, `_HREG`,
    /// `_ISTS` or `_IREG` name suffix.
    pub classify_by_suffix: bool,
}

impl ParserOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_classify_by_suffix(mut self, enabled: bool) -> Self {
        self.classify_by_suffix = enabled;
        self
    }
}

/// A line the parser skipped or only partly understood.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWarning {
    /// 1-based line number
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

/// Result of a successful parse.
#[derive(Debug, Clone)]
pub struct ParsedHeader {
    pub map: RegisterMap,
    pub warnings: Vec<ParseWarning>,
}

/// Header text to register map.
///
/// # Example
///
/// ```rust
/// use modbus_regmap::{HeaderParser, ParserOptions, RegisterClass};
///
/// let header = "\
/// // Input register (IREGS)
/// #define LOOP_TIME_US_IREG 10 //< [us] Time for one loop cycle
/// //                        10 //< lower part of uint32_t
/// //                        11 //< higher part of uint32_t
/// ";
///
/// let parsed = HeaderParser::new(ParserOptions::default()).parse(header).unwrap();
/// let reg = parsed.map.get(RegisterClass::InputRegister, "LOOP_TIME_US_IREG").unwrap();
/// assert_eq!((reg.address, reg.width), (10, 2));
/// assert_eq!(reg.unit, "us");
/// ```
#[derive(Debug, Clone, Default)]
pub struct HeaderParser {
    options: ParserOptions,
}

impl HeaderParser {
    pub fn new(options: ParserOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ParserOptions {
        &self.options
    }

    /// Parse header text.
    ///
    /// Fails with [`ModbusError::MalformedHeader`] only when the resulting
    /// map is empty. Every warning is also emitted through `tracing`.
    pub fn parse(&self, text: &str) -> ModbusResult<ParsedHeader> {
        let mut state = ParseState::default();

        for (idx, line) in text.lines().enumerate() {
            if idx < BANNER_LINES {
                state.scan_banner(line);
            }
            state.feed(idx + 1, line, &self.options);
        }
        state.flush_pending();

        let ParseState {
            mut map,
            meta,
            warnings,
            ..
        } = state;

        if map.is_empty() {
            return Err(ModbusError::malformed_header(format!(
                "no register definitions found ({} warning(s))",
                warnings.len()
            )));
        }
        map.set_meta(meta);

        info!(
            "Parsed {} register(s) from header with {} warning(s)",
            map.len(),
            warnings.len()
        );
        Ok(ParsedHeader { map, warnings })
    }

    /// Read and parse a header file.
    pub fn parse_file<P: AsRef<Path>>(&self, path: P) -> ModbusResult<ParsedHeader> {
        let path = path.as_ref();
        debug!("Reading header {}", path.display());
        let text = std::fs::read_to_string(path)?;
        self.parse(&text)
    }
}

/// Define waiting for its continuation lines.
struct Pending {
    line: usize,
    definition: RegisterDefinition,
    /// Last continuation address consumed.
    last: Option<u64>,
    /// Continuations kept counting past `address + 1`.
    overrun: bool,
}

#[derive(Default)]
struct ParseState {
    map: RegisterMap,
    meta: HeaderMeta,
    warnings: Vec<ParseWarning>,
    section: Option<RegisterClass>,
    pending: Option<Pending>,
}

impl ParseState {
    fn warn(&mut self, line: usize, message: String) {
        warn!("Header line {}: {}", line, message);
        self.warnings.push(ParseWarning { line, message });
    }

    fn scan_banner(&mut self, line: &str) {
        if let Some(caps) = MODIFIED_RE.captures(line) {
            self.meta.modified = Some(caps[1].to_string());
        } else if let Some(caps) = CREATED_RE.captures(line) {
            self.meta.created = Some(caps[1].to_string());
        }
    }

    fn feed(&mut self, line_no: usize, line: &str, options: &ParserOptions) {
        if let Some(caps) = SECTION_RE.captures(line) {
            self.flush_pending();
            self.section = RegisterClass::from_key(&caps[1]);
            debug!("Line {}: entering {} section", line_no, &caps[1]);
            return;
        }

        if let Some(caps) = DEFINE_RE.captures(line) {
            self.flush_pending();
            self.start_define(line_no, &caps, options);
            return;
        }

        if DEFINE_PREFIX_RE.is_match(line) {
            self.flush_pending();
            if self.section.is_some() {
                self.warn(line_no, format!("unparsable define: {}", line.trim()));
            }
            return;
        }

        if let Some(caps) = CONTINUATION_RE.captures(line) {
            self.continue_define(line_no, &caps);
            return;
        }

        self.flush_pending();
    }

    fn start_define(&mut self, line_no: usize, caps: &Captures<'_>, options: &ParserOptions) {
        let name = &caps[1];

        let class = self.section.or_else(|| {
            if options.classify_by_suffix {
                RegisterClass::from_name_suffix(name)
            } else {
                None
            }
        });
        let Some(class) = class else {
            debug!("Line {}: ignoring {} outside any register section", line_no, name);
            return;
        };

        let address = match caps.get(2).map(|m| parse_address(m.as_str())) {
            Some(Ok(address)) => address,
            Some(Err(reason)) => {
                self.warn(line_no, format!("{}: {}; skipped", name, reason));
                return;
            }
            None => {
                self.warn(line_no, format!("{} has no numeric address; skipped", name));
                return;
            }
        };

        let annotation = parse_annotation(caps.get(3).map_or("", |m| m.as_str()));
        if let Some(ref reason) = annotation.warning {
            self.warn(line_no, format!("{}: {}", name, reason));
        }

        let mut definition = RegisterDefinition::new(name, class, address)
            .with_unit(annotation.unit)
            .with_description(annotation.description);
        if let Some(range) = annotation.range {
            definition = definition.with_range(range);
        }

        self.pending = Some(Pending {
            line: line_no,
            definition,
            last: None,
            overrun: false,
        });
    }

    fn continue_define(&mut self, line_no: usize, caps: &Captures<'_>) {
        // Digits only, so a parse failure means overflow
        let address = caps[2].parse::<u64>().unwrap_or(u64::MAX);

        let Some(pending) = self.pending.as_mut() else {
            if self.section.is_some() {
                self.warn(
                    line_no,
                    format!("continuation at {} without a preceding define", address),
                );
            }
            return;
        };

        if let Some(other) = caps.get(1).map(|m| m.as_str()) {
            if other != pending.definition.name {
                let message = format!(
                    "continuation names {} but follows {}",
                    other, pending.definition.name
                );
                self.warn(line_no, message);
                return;
            }
        }

        let base = u64::from(pending.definition.address);
        // Only a run that keeps counting past the high word is an overrun
        let extends_run = pending
            .last
            .is_some_and(|last| last > base && address == last + 1);

        if address == base {
            pending.last = Some(address);
        } else if address == base + 1 {
            pending.definition.width = 2;
            pending.last = Some(address);
        } else if extends_run {
            pending.overrun = true;
            pending.last = Some(address);
        } else {
            let name = pending.definition.name.clone();
            self.flush_pending();
            self.warn(
                line_no,
                format!("comment at {} is not a continuation of {}; ignored", address, name),
            );
        }
    }

    fn flush_pending(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let name = pending.definition.name.clone();

        if pending.overrun {
            self.warn(
                pending.line,
                format!("{} spans more than two registers; skipped", name),
            );
            return;
        }

        let (class, address, width) = (
            pending.definition.class,
            pending.definition.address,
            pending.definition.width,
        );
        match self.map.insert(pending.definition) {
            Ok(()) => debug!("{} {} at {} (width {})", class, name, address, width),
            Err(err) => self.warn(pending.line, format!("{} skipped: {}", name, err)),
        }
    }
}

fn parse_address(token: &str) -> Result<u16, String> {
    let parsed = match token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => token.parse::<u64>(),
    };
    match parsed {
        Ok(value) => {
            u16::try_from(value).map_err(|_| format!("address {} exceeds 65535", value))
        }
        Err(_) => Err(format!("'{}' is not a numeric address", token)),
    }
}

/// What the leading `[...]` of a define comment says.
#[derive(Debug, Default, PartialEq, Eq)]
struct Annotation {
    unit: String,
    range: Option<RegisterRange>,
    description: String,
    warning: Option<String>,
}

fn parse_annotation(comment: &str) -> Annotation {
    let comment = comment.trim();
    let verbatim = |warning: Option<String>| Annotation {
        description: comment.to_string(),
        warning,
        ..Annotation::default()
    };

    let Some(body) = comment.strip_prefix('[') else {
        return verbatim(None);
    };
    let Some(close) = body.find(']') else {
        return verbatim(None);
    };
    let inner = body[..close].trim();
    let rest = body[close + 1..].trim();

    if let Some(caps) = RANGE_RE.captures(inner) {
        if let (Ok(min), Ok(max)) = (caps[1].parse::<i64>(), caps[2].parse::<i64>()) {
            return match RegisterRange::new(min, max) {
                Ok(range) => Annotation {
                    range: Some(range),
                    description: rest.to_string(),
                    ..Annotation::default()
                },
                Err(_) => verbatim(Some(format!("range [{}] has min above max", inner))),
            };
        }
    }

    if SEPARATOR_RE.is_match(inner) {
        return verbatim(Some(format!("ambiguous annotation [{}]", inner)));
    }

    if !inner.is_empty() && !inner.contains(char::is_whitespace) {
        return Annotation {
            unit: inner.to_string(),
            description: rest.to_string(),
            ..Annotation::default()
        };
    }

    Annotation {
        description: format!("{} {}", inner, rest).trim().to_string(),
        ..Annotation::default()
    }
}
