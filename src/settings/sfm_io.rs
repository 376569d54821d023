//! Reader and writer for the legacy settings block format.
//!
//! Saved maps are themselves SFM files: a `\ShoeboxImportSettings` block
//! holding one `\Marker .. \-Marker` section per field mapping and one
//! `\CharMapping .. \-CharMapping` section per character mapping. The
//! settings file is tokenized with the same scanner used for data files.
//!
//! Every field that equality sees is written by [`write_settings`] and
//! restored by [`read_settings`]; unknown keys are skipped with a warning.

use std::fmt::Write as _;

use chrono::Utc;
use tracing::warn;

use crate::error::{ImportError, Result};
use crate::scanner::ScanResult;

use super::{
    CharEffect, CharMapping, ChoiceOptions, DateOptions, FieldMapping, FieldOptions,
    ImportSettings, MatchBy, MultiLingualOptions, RecordKind, Substitution, TextOptions,
};

const BLOCK: &str = "ShoeboxImportSettings";
const BLOCK_END: &str = "-ShoeboxImportSettings";

/// Serialize settings into the block format.
#[must_use]
pub fn write_settings(settings: &ImportSettings) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\\{BLOCK} {}", settings.name);
    let _ = writeln!(out, "\\RecordMarker {}", settings.record_marker);

    for mapping in settings.mappings.values() {
        write_mapping(&mut out, mapping);
    }
    for cm in &settings.char_mappings {
        write_char_mapping(&mut out, cm);
    }

    let _ = writeln!(out, "\\{BLOCK_END} {}", Utc::now().to_rfc3339());
    out
}

fn write_mapping(out: &mut String, m: &FieldMapping) {
    let _ = writeln!(out, "\\Marker {}", m.marker);
    let _ = writeln!(out, "\\MkrNam {}", m.name);
    match m.record_kind {
        RecordKind::None => {}
        RecordKind::Event => {
            let _ = writeln!(out, "\\Event {}", m.level);
        }
        RecordKind::Analysis => {
            let _ = writeln!(out, "\\Analysis {}", m.level);
        }
    }
    let _ = writeln!(out, "\\Flid {}", m.field);
    if !m.writing_system.is_empty() {
        let _ = writeln!(out, "\\WrtSys {}", m.writing_system);
    }
    if m.ignore_empty {
        let _ = writeln!(out, "\\IgnoreEmpty");
    }

    match &m.options {
        FieldOptions::Discard => {}
        FieldOptions::Text(t) => {
            if t.para_every_line {
                let _ = writeln!(out, "\\ParaEveryLine");
            }
            if t.para_after_blank {
                let _ = writeln!(out, "\\ParaAfterBlank");
            }
            if t.para_after_indent {
                let _ = writeln!(out, "\\ParaAfterIndent");
            }
            if t.para_after_short_line {
                let _ = writeln!(out, "\\ParaShortLine");
            }
            let _ = writeln!(out, "\\ShortLineLimit {}", t.short_line_limit);
            if !t.style.is_empty() {
                let _ = writeln!(out, "\\TextStyle {}", t.style);
            }
            if !t.writing_system.is_empty() {
                let _ = writeln!(out, "\\TextWrtSys {}", t.writing_system);
            }
        }
        FieldOptions::Choice(c) => {
            for d in &c.delimiters {
                let _ = writeln!(out, "\\MultiChoice {d}");
            }
            for d in &c.hierarchy_delimiters {
                let _ = writeln!(out, "\\SubChoice {d}");
            }
            if let Some((begin, end)) = &c.between {
                let _ = writeln!(out, "\\BeginChoice {begin}");
                let _ = writeln!(out, "\\EndChoice {end}");
            }
            if let Some(before) = &c.before {
                let _ = writeln!(out, "\\BeforeChoice {before}");
            }
            for s in &c.substitutions {
                let _ = writeln!(out, "\\ChoiceSubst {}={}", s.from, s.to);
            }
            if let Some(default) = &c.empty_default {
                let _ = writeln!(out, "\\DefaultChoice {default}");
            }
            let match_by = match c.match_by {
                MatchBy::Name => "Name",
                MatchBy::Abbreviation => "Abbreviation",
            };
            let _ = writeln!(out, "\\MatchChoice {match_by}");
            let _ = writeln!(out, "\\PossList {}", c.list);
        }
        FieldOptions::Date(d) => {
            if d.formats.is_empty() {
                // Bare key keeps the destination kind declared.
                let _ = writeln!(out, "\\DateFormat");
            }
            for f in &d.formats {
                let _ = writeln!(out, "\\DateFormat {f}");
            }
        }
        FieldOptions::MultiLingual(ml) => {
            let _ = writeln!(out, "\\AltWrtSys {}", ml.writing_system);
        }
    }

    let _ = writeln!(out, "\\-Marker");
}

fn write_char_mapping(out: &mut String, cm: &CharMapping) {
    let _ = writeln!(out, "\\CharMapping");
    let _ = writeln!(out, "\\BeginMap {}", cm.begin);
    let _ = writeln!(out, "\\EndMap {}", cm.end);
    match &cm.effect {
        CharEffect::Ignore => {}
        CharEffect::Bold => {
            let _ = writeln!(out, "\\DirectFmt Bold");
        }
        CharEffect::Italic => {
            let _ = writeln!(out, "\\DirectFmt Italic");
        }
        CharEffect::Style(name) => {
            let _ = writeln!(out, "\\CharStyle {name}");
        }
        CharEffect::OldWritingSystem(ws) => {
            let _ = writeln!(out, "\\OldWritingSystem {ws}");
        }
    }
    let _ = writeln!(out, "\\-CharMapping");
}

/// Parse settings from the block format.
pub fn read_settings(input: &str) -> Result<ImportSettings> {
    let scan = ScanResult::scan(input);
    let mut fields = scan.fields().iter();

    let head = fields
        .next()
        .filter(|f| f.marker == BLOCK)
        .ok_or_else(|| ImportError::Settings(format!("missing \\{BLOCK} block")))?;

    let mut settings = ImportSettings::new(head.value.clone());
    let mut mapping: Option<FieldMapping> = None;
    let mut char_mapping: Option<CharMapping> = None;

    for field in fields {
        let key = field.marker.as_str();
        let value = field.value.as_str();

        // Section terminators close whichever section is open.
        match key {
            "-Marker" => {
                if let Some(m) = mapping.take() {
                    settings.insert(m);
                }
                continue;
            }
            "-CharMapping" => {
                let cm = char_mapping.take().filter(|cm| !cm.begin.is_empty());
                settings.char_mappings.extend(cm);
                continue;
            }
            _ => {}
        }

        if let Some(cm) = char_mapping.as_mut() {
            match key {
                "BeginMap" => cm.begin = value.to_string(),
                "EndMap" => cm.end = value.to_string(),
                "DirectFmt" => {
                    cm.effect = match value {
                        "Bold" => CharEffect::Bold,
                        "Italic" => CharEffect::Italic,
                        other => {
                            warn!(marker = other, "unknown \\DirectFmt value, ignoring");
                            continue;
                        }
                    };
                }
                "CharStyle" => cm.effect = CharEffect::Style(value.to_string()),
                "OldWritingSystem" => cm.effect = CharEffect::OldWritingSystem(value.to_string()),
                other => warn!(key = other, "unknown key in \\CharMapping, skipped"),
            }
            continue;
        }

        if let Some(m) = mapping.as_mut() {
            match key {
                "MkrNam" => m.name = value.to_string(),
                "Event" => {
                    m.record_kind = RecordKind::Event;
                    m.level = parse_level(value);
                }
                "Analysis" => {
                    m.record_kind = RecordKind::Analysis;
                    m.level = parse_level(value);
                }
                "Flid" => m.field = value.parse().unwrap_or(0),
                "WrtSys" => m.writing_system = value.to_string(),
                "IgnoreEmpty" => m.ignore_empty = true,
                "ParaEveryLine" => text_opts(m).para_every_line = true,
                "ParaAfterBlank" => text_opts(m).para_after_blank = true,
                "ParaAfterIndent" => text_opts(m).para_after_indent = true,
                "ParaShortLine" => text_opts(m).para_after_short_line = true,
                "ShortLineLimit" => {
                    let opts = text_opts(m);
                    opts.short_line_limit =
                        value.parse().unwrap_or(super::DEFAULT_SHORT_LINE_LIMIT);
                }
                "TextStyle" => text_opts(m).style = value.to_string(),
                "TextWrtSys" => text_opts(m).writing_system = value.to_string(),
                "MultiChoice" => choice_opts(m).delimiters.push(value.to_string()),
                "SubChoice" => choice_opts(m).hierarchy_delimiters.push(value.to_string()),
                "BeginChoice" => {
                    let opts = choice_opts(m);
                    let end = opts.between.take().map(|(_, e)| e).unwrap_or_default();
                    opts.between = Some((value.to_string(), end));
                }
                "EndChoice" => {
                    let opts = choice_opts(m);
                    let begin = opts.between.take().map(|(b, _)| b).unwrap_or_default();
                    opts.between = Some((begin, value.to_string()));
                }
                "BeforeChoice" => choice_opts(m).before = Some(value.to_string()),
                "ChoiceSubst" => match value.split_once('=') {
                    Some((from, to)) => choice_opts(m).substitutions.push(Substitution {
                        from: from.to_string(),
                        to: to.to_string(),
                    }),
                    None => warn!(value, "\\ChoiceSubst without '=', skipped"),
                },
                "DefaultChoice" => choice_opts(m).empty_default = Some(value.to_string()),
                "MatchChoice" => {
                    choice_opts(m).match_by = if value.eq_ignore_ascii_case("abbreviation") {
                        MatchBy::Abbreviation
                    } else {
                        MatchBy::Name
                    };
                }
                "PossList" => choice_opts(m).list = value.parse().unwrap_or(0),
                "DateFormat" => {
                    let opts = date_opts(m);
                    if !value.is_empty() {
                        opts.formats.push(value.to_string());
                    }
                }
                "AltWrtSys" => {
                    m.options = FieldOptions::MultiLingual(MultiLingualOptions {
                        writing_system: value.to_string(),
                    });
                }
                other => warn!(key = other, "unknown key in \\Marker section, skipped"),
            }
            continue;
        }

        match key {
            "RecordMarker" => settings.record_marker = value.to_string(),
            "Marker" => mapping = Some(FieldMapping::new(value)),
            "CharMapping" => {
                char_mapping = Some(CharMapping {
                    begin: String::new(),
                    end: String::new(),
                    effect: CharEffect::Ignore,
                });
            }
            BLOCK_END => break,
            other => warn!(key = other, "unknown top-level settings key, skipped"),
        }
    }

    if mapping.is_some() || char_mapping.is_some() {
        warn!("settings file ended inside an open section");
    }
    Ok(settings)
}

fn parse_level(value: &str) -> u32 {
    value.parse().unwrap_or(1).max(1)
}

/// Text options start with every paragraph trigger off; only keys present in
/// the file turn them on, so written flags round-trip exactly.
fn text_opts(m: &mut FieldMapping) -> &mut TextOptions {
    if !matches!(m.options, FieldOptions::Text(_)) {
        m.options = FieldOptions::Text(TextOptions {
            para_every_line: false,
            para_after_blank: false,
            para_after_indent: false,
            para_after_short_line: false,
            short_line_limit: super::DEFAULT_SHORT_LINE_LIMIT,
            style: String::new(),
            writing_system: String::new(),
        });
    }
    match &mut m.options {
        FieldOptions::Text(t) => t,
        _ => unreachable!("options coerced to text above"),
    }
}

fn choice_opts(m: &mut FieldMapping) -> &mut ChoiceOptions {
    if !matches!(m.options, FieldOptions::Choice(_)) {
        m.options = FieldOptions::Choice(ChoiceOptions::default());
    }
    match &mut m.options {
        FieldOptions::Choice(c) => c,
        _ => unreachable!("options coerced to choice above"),
    }
}

fn date_opts(m: &mut FieldMapping) -> &mut DateOptions {
    if !matches!(m.options, FieldOptions::Date(_)) {
        m.options = FieldOptions::Date(DateOptions::default());
    }
    match &mut m.options {
        FieldOptions::Date(d) => d,
        _ => unreachable!("options coerced to date above"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_settings() -> ImportSettings {
        let mut settings = ImportSettings::new("standard format test");
        settings.record_marker = "nt".to_string();

        let mut rec = FieldMapping::new("nt");
        rec.name = "Note".to_string();
        rec.record_kind = RecordKind::Event;
        rec.level = 1;
        rec.field = 101;
        settings.insert(rec);

        let mut sub = FieldMapping::new("sub");
        sub.record_kind = RecordKind::Analysis;
        sub.level = 2;
        sub.field = 102;
        settings.insert(sub);

        let mut de = FieldMapping::new("de");
        de.field = 201;
        de.writing_system = "en".to_string();
        de.options = FieldOptions::Text(TextOptions {
            para_every_line: false,
            para_after_blank: true,
            para_after_indent: false,
            para_after_short_line: true,
            short_line_limit: 72,
            style: "Description".to_string(),
            writing_system: "en".to_string(),
        });
        settings.insert(de);

        let mut anth = FieldMapping::new("anth");
        anth.field = 301;
        anth.ignore_empty = true;
        anth.options = FieldOptions::Choice(ChoiceOptions {
            delimiters: vec![";".to_string(), ",".to_string()],
            hierarchy_delimiters: vec!["::".to_string()],
            between: Some(("(".to_string(), ")".to_string())),
            before: Some("-".to_string()),
            substitutions: vec![Substitution {
                from: "econ".to_string(),
                to: "Economy".to_string(),
            }],
            empty_default: Some("***".to_string()),
            match_by: MatchBy::Abbreviation,
            list: 11,
        });
        settings.insert(anth);

        let mut dt = FieldMapping::new("dt");
        dt.field = 401;
        dt.options = FieldOptions::Date(DateOptions {
            formats: vec!["d/MMM/yy".to_string()],
        });
        settings.insert(dt);

        let mut gl = FieldMapping::new("gl");
        gl.field = 501;
        gl.options = FieldOptions::MultiLingual(MultiLingualOptions {
            writing_system: "fr".to_string(),
        });
        settings.insert(gl);

        settings.char_mappings = vec![
            CharMapping {
                begin: "|b".to_string(),
                end: "|r".to_string(),
                effect: CharEffect::Bold,
            },
            CharMapping {
                begin: "|v".to_string(),
                end: "|r".to_string(),
                effect: CharEffect::OldWritingSystem("xkal".to_string()),
            },
        ];
        settings
    }

    #[test]
    fn test_roundtrip_is_equal() {
        let settings = full_settings();
        let text = write_settings(&settings);
        let back = read_settings(&text).unwrap();
        assert_eq!(settings, back);
    }

    #[test]
    fn test_roundtrip_empty_date_formats() {
        let mut settings = full_settings();
        if let Some(m) = settings.mappings.get_mut("dt") {
            m.options = FieldOptions::Date(DateOptions::default());
        }
        let back = read_settings(&write_settings(&settings)).unwrap();
        assert_eq!(settings, back);
    }

    #[test]
    fn test_missing_block_is_an_error() {
        assert!(read_settings("\\Marker nt\n\\-Marker\n").is_err());
    }

    #[test]
    fn test_unknown_keys_are_skipped() {
        let text = "\\ShoeboxImportSettings t\n\
            \\RecordMarker nt\n\
            \\Marker nt\n\\Event 1\n\\Flid 1\n\\Bogus value\n\\-Marker\n\
            \\-ShoeboxImportSettings\n";
        let settings = read_settings(text).unwrap();
        assert_eq!(settings.mappings.len(), 1);
        assert_eq!(settings.mapping("nt").unwrap().record_kind, RecordKind::Event);
    }

    #[test]
    fn test_char_mapping_without_begin_is_dropped() {
        let text = "\\ShoeboxImportSettings t\n\
            \\CharMapping\n\\EndMap |r\n\\-CharMapping\n\
            \\-ShoeboxImportSettings\n";
        let settings = read_settings(text).unwrap();
        assert!(settings.char_mappings.is_empty());
    }
}
