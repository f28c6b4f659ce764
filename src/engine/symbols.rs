//! Loads debug information for a debuggee image: parses the ELF file with
//! `object`, feeds its sections to `gimli`, and walks each compilation
//! unit's line-number program into a flat `SourceFile`/`SourceLine` index.

use crate::error::{Error, Result};
use fallible_iterator::FallibleIterator;
use gimli::{AttributeValue, Reader, RunTimeEndian};
use object::{Object, ObjectSection};
use rayon::prelude::*;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

type R = gimli::EndianArcSlice<RunTimeEndian>;

/// A single (line, address) pair contributed by the line-number program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLine {
    pub line: u64,
    pub address: u64,
}

/// A source file referenced by debug information, with every relevant line
/// it contributes code addresses for (see SPEC_FULL.md §3, SourceFile).
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub source: PathBuf,
    pub object: PathBuf,
    pub lines: Vec<SourceLine>,
}

impl SourceFile {
    /// Smallest line entry with `line >= requested`, or `None` if no line in
    /// this file reaches that far. Assumes `lines` is sorted ascending.
    pub fn find_breakable_line(&self, requested: u64) -> Option<&SourceLine> {
        self.lines.iter().find(|l| l.line >= requested)
    }

    pub fn contains_line(&self, line: u64) -> bool {
        self.lines.iter().any(|l| l.line == line)
    }
}

/// The set of source files known from debug information loaded so far.
#[derive(Default)]
pub struct SymbolIndex {
    files: Vec<SourceFile>,
}

impl SymbolIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    /// Find a source file whose absolute path ends with `suffix` (e.g. a
    /// bare filename matches any directory). Returns the first match.
    pub fn find_by_suffix(&self, suffix: &str) -> Option<&SourceFile> {
        self.files
            .iter()
            .find(|f| f.source.to_string_lossy().ends_with(suffix))
    }

    /// Find a source file by an exact absolute-path match.
    pub fn find_exact(&self, path: &Path) -> Option<&SourceFile> {
        self.files.iter().find(|f| f.source == path)
    }

    /// Fold in a `SourceFile` discovered from another image (e.g. a loaded
    /// shared library), skipping it if this index already covers that path.
    pub fn adopt(&mut self, file: SourceFile) {
        if self.find_exact(&file.source).is_none() {
            self.files.push(file);
        }
    }

    fn find_or_create(&mut self, source: PathBuf, object: PathBuf) -> &mut SourceFile {
        if let Some(pos) = self.files.iter().position(|f| f.source == source) {
            return &mut self.files[pos];
        }
        self.files.push(SourceFile {
            source,
            object,
            lines: Vec::new(),
        });
        self.files.last_mut().expect("just pushed")
    }

    /// Sort each file's lines ascending by line number once loading is done,
    /// so `find_breakable_line`'s linear scan sees them in order.
    fn finalize(&mut self) {
        for file in &mut self.files {
            file.lines.sort_unstable_by_key(|l| l.line);
        }
    }
}

/// An ELF image parsed for both its entry point and its DWARF line
/// information, if present.
pub struct LoadedImage {
    pub entry: u64,
    pub has_debug_info: bool,
    pub symbols: SymbolIndex,
}

/// Parse `path`'s ELF header and DWARF line tables.
///
/// `has_debug_info` is `false` (not an error) when the image carries no
/// `.debug_info` section — see SPEC_FULL.md §7, "Module without line-level
/// symbols".
pub fn load(path: &Path) -> Result<LoadedImage> {
    let file = fs::File::open(path)?;
    let mmap = unsafe { memmap2::Mmap::map(&file)? };
    let obj = object::File::parse(&*mmap).map_err(|source| Error::ObjParsing {
        path: path.to_path_buf(),
        source,
    })?;
    let entry = obj.entry();
    let has_debug_info = obj.section_by_name(".debug_info").is_some();

    let mut symbols = SymbolIndex::new();
    if has_debug_info {
        let endian = if obj.is_little_endian() {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        };
        let dwarf = load_sections(&obj, endian)?;
        load_line_tables(&dwarf, path, &mut symbols)?;
    }
    symbols.finalize();

    Ok(LoadedImage {
        entry,
        has_debug_info,
        symbols,
    })
}

fn load_section(id: gimli::SectionId, obj: &object::File, endian: RunTimeEndian) -> R {
    let data = obj
        .section_by_name(id.name())
        .and_then(|s| s.uncompressed_data().ok())
        .unwrap_or(Cow::Borrowed(&[]));
    gimli::EndianArcSlice::new(Arc::from(&*data), endian)
}

fn load_sections(obj: &object::File, endian: RunTimeEndian) -> Result<gimli::Dwarf<R>> {
    Ok(gimli::Dwarf::load(|id| -> Result<R> {
        Ok(load_section(id, obj, endian))
    })?)
}

fn load_line_tables(dwarf: &gimli::Dwarf<R>, object_path: &Path, out: &mut SymbolIndex) -> Result<()> {
    let mut units = dwarf.units();
    let mut headers = Vec::new();
    while let Some(header) = units.next()? {
        headers.push(header);
    }

    // Units within one image are independent; parsing them is the dominant
    // cost for large binaries, so fan out across a thread pool the way the
    // teacher's loader parallelizes section loading.
    let parsed: Vec<Result<Vec<(PathBuf, Vec<SourceLine>)>>> = headers
        .into_par_iter()
        .map(|header| parse_unit(dwarf, header))
        .collect();

    for unit_files in parsed {
        for (source, lines) in unit_files? {
            let file = out.find_or_create(source, object_path.to_path_buf());
            file.lines.extend(lines);
        }
    }

    Ok(())
}

fn parse_unit(dwarf: &gimli::Dwarf<R>, header: gimli::UnitHeader<R>) -> Result<Vec<(PathBuf, Vec<SourceLine>)>> {
    let unit = dwarf.unit(header.clone())?;
    let mut entries = unit.entries();

    let mut by_file: HashMap<PathBuf, Vec<SourceLine>> = HashMap::new();

    while let Some((_, entry)) = entries.next_dfs()? {
        if entry.tag() != gimli::constants::DW_TAG_compile_unit {
            continue;
        }
        let Some(AttributeValue::DebugLineRef(offset)) =
            entry.attr_value(gimli::constants::DW_AT_stmt_list)?
        else {
            continue;
        };

        let program = dwarf.debug_line.program(
            offset,
            header.address_size(),
            unit.comp_dir.clone(),
            unit.name.clone(),
        )?;
        let (line_program, sequences) = program.sequences()?;

        for sequence in sequences {
            let mut rows = line_program.resume_from(&sequence);
            while let Some((_, row)) = rows.next_row()? {
                if row.end_sequence() {
                    continue;
                }
                let Some(line) = row.line() else {
                    continue;
                };
                let Some(path) =
                    render_file_path(dwarf, &unit, line_program.header(), row.file_index())?
                else {
                    continue;
                };

                by_file.entry(path).or_default().push(SourceLine {
                    line: line.get(),
                    address: row.address(),
                });
            }
        }
    }

    Ok(by_file.into_iter().collect())
}

fn render_file_path(
    dwarf: &gimli::Dwarf<R>,
    unit: &gimli::Unit<R>,
    header: &gimli::LineProgramHeader<R>,
    file_index: u64,
) -> Result<Option<PathBuf>> {
    let Some(file) = header.file(file_index) else {
        return Ok(None);
    };

    let mut path = PathBuf::new();
    if let Some(comp_dir) = &unit.comp_dir {
        path.push(comp_dir.to_string_lossy()?.as_ref());
    }

    if file.directory_index() != 0 {
        if let Some(dir_attr) = file.directory(header) {
            if let Ok(dir) = dwarf.attr_string(unit, dir_attr) {
                path.push(dir.to_string_lossy()?.as_ref());
            }
        }
    }

    let name = dwarf.attr_string(unit, file.path_name())?;
    path.push(name.to_string_lossy()?.as_ref());

    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_breakable_line_picks_smallest_matching() {
        let file = SourceFile {
            source: PathBuf::from("/proj/foo.c"),
            object: PathBuf::from("/proj/foo"),
            lines: vec![
                SourceLine { line: 4, address: 0x1000 },
                SourceLine { line: 10, address: 0x1010 },
                SourceLine { line: 12, address: 0x1020 },
            ],
        };
        assert_eq!(file.find_breakable_line(7).unwrap().line, 10);
        assert_eq!(file.find_breakable_line(10).unwrap().line, 10);
        assert!(file.find_breakable_line(13).is_none());
    }

    #[test]
    fn find_by_suffix_matches_bare_filename() {
        let mut idx = SymbolIndex::new();
        idx.find_or_create(PathBuf::from("/home/me/proj/foo.c"), PathBuf::from("/tmp/a.o"));
        assert!(idx.find_by_suffix("foo.c").is_some());
        assert!(idx.find_by_suffix("bar.c").is_none());
    }

    #[test]
    fn finalize_sorts_lines_ascending() {
        let mut idx = SymbolIndex::new();
        {
            let file = idx.find_or_create(PathBuf::from("/a.c"), PathBuf::from("/a.o"));
            file.lines.push(SourceLine { line: 9, address: 2 });
            file.lines.push(SourceLine { line: 3, address: 1 });
        }
        idx.finalize();
        let lines = &idx.files()[0].lines;
        assert_eq!(lines.iter().map(|l| l.line).collect::<Vec<_>>(), vec![3, 9]);
    }
}
