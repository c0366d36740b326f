//! Zip packaging of committed slides.

use std::fs::File;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use deckloop_contracts::runs::manifest::DeckManifest;
use deckloop_contracts::slides::slide_file_stem;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::pipeline::CommittedSlide;

/// One slide's files as they go into the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub index: usize,
    pub html: Option<PathBuf>,
    pub png: Option<PathBuf>,
}

impl From<&CommittedSlide> for ArchiveEntry {
    fn from(slide: &CommittedSlide) -> Self {
        Self {
            index: slide.index,
            html: Some(slide.html_path.clone()),
            png: Some(slide.png_path.clone()),
        }
    }
}

/// Writes `html/slide_NNN.html` and `png/slide_NNN.png` for every entry in
/// ascending slide order. Returns the number of files written.
pub fn write_archive(entries: &[ArchiveEntry], out: &Path) -> Result<usize> {
    if let Some(parent) = out.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file = File::create(out).with_context(|| format!("failed to create {}", out.display()))?;
    let written = write_entries(ZipWriter::new(file), entries)
        .with_context(|| format!("failed to write archive {}", out.display()))?;
    Ok(written)
}

/// Rebuilds the archive for a finished run from its `manifest.json`.
pub fn export_from_manifest(run_dir: &Path, out: &Path) -> Result<usize> {
    let manifest_path = run_dir.join("manifest.json");
    if !manifest_path.is_file() {
        bail!("no manifest.json in {}", run_dir.display());
    }
    let manifest = DeckManifest::load(&manifest_path);
    let entries: Vec<ArchiveEntry> = manifest
        .ordered_artifacts()
        .into_iter()
        .map(|(index, html, png)| ArchiveEntry { index, html, png })
        .collect();
    if entries.is_empty() {
        bail!("manifest {} lists no slides", manifest_path.display());
    }
    write_archive(&entries, out)
}

fn write_entries<W: Write + Seek>(mut zip: ZipWriter<W>, entries: &[ArchiveEntry]) -> Result<usize> {
    let mut ordered: Vec<&ArchiveEntry> = entries.iter().collect();
    ordered.sort_by_key(|entry| entry.index);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.add_directory("html/", options)?;
    zip.add_directory("png/", options)?;
    let mut written = 0;
    for entry in &ordered {
        if let Some(source) = &entry.html {
            let name = format!("html/{}.html", slide_file_stem(entry.index));
            add_file(&mut zip, &name, source, options)?;
            written += 1;
        }
    }
    for entry in &ordered {
        if let Some(source) = &entry.png {
            let name = format!("png/{}.png", slide_file_stem(entry.index));
            add_file(&mut zip, &name, source, options)?;
            written += 1;
        }
    }
    zip.finish()?;
    Ok(written)
}

fn add_file<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    name: &str,
    source: &Path,
    options: FileOptions,
) -> Result<()> {
    let bytes =
        std::fs::read(source).with_context(|| format!("failed to read {}", source.display()))?;
    zip.start_file(name, options)?;
    zip.write_all(&bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::path::Path;

    use anyhow::Result;
    use deckloop_contracts::runs::manifest::{DeckManifest, SlideEntry};
    use zip::ZipArchive;

    use super::{export_from_manifest, write_archive, ArchiveEntry};

    fn entry_names(path: &Path) -> Result<Vec<String>> {
        let mut archive = ZipArchive::new(File::open(path)?)?;
        let mut out = Vec::new();
        for i in 0..archive.len() {
            out.push(archive.by_index(i)?.name().to_string());
        }
        Ok(out)
    }

    #[test]
    fn entries_are_written_in_slide_order() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let mut entries = Vec::new();
        for index in [2usize, 0, 1] {
            let html = temp.path().join(format!("s{index}.html"));
            let png = temp.path().join(format!("s{index}.png"));
            std::fs::write(&html, format!("<p>{index}</p>"))?;
            std::fs::write(&png, [index as u8])?;
            entries.push(ArchiveEntry {
                index,
                html: Some(html),
                png: Some(png),
            });
        }
        let out = temp.path().join("deck.zip");
        assert_eq!(write_archive(&entries, &out)?, 6);
        assert_eq!(
            entry_names(&out)?,
            vec![
                "html/",
                "png/",
                "html/slide_001.html",
                "html/slide_002.html",
                "html/slide_003.html",
                "png/slide_001.png",
                "png/slide_002.png",
                "png/slide_003.png",
            ]
        );
        Ok(())
    }

    #[test]
    fn export_reads_relative_manifest_paths() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let run_dir = temp.path().join("run");
        std::fs::create_dir_all(run_dir.join("html"))?;
        std::fs::create_dir_all(run_dir.join("png"))?;
        std::fs::write(run_dir.join("html/slide_001.html"), "<p>one</p>")?;
        std::fs::write(run_dir.join("png/slide_001.png"), [1u8])?;

        let mut manifest = DeckManifest::new(run_dir.join("manifest.json"));
        let mut entry = SlideEntry::new(0, "one");
        entry.html_path = Some("html/slide_001.html".to_string());
        entry.png_path = Some("png/slide_001.png".to_string());
        manifest.add_slide(entry);
        manifest.save()?;

        let out = temp.path().join("export.zip");
        assert_eq!(export_from_manifest(&run_dir, &out)?, 2);
        let mut archive = ZipArchive::new(File::open(&out)?)?;
        let mut html = String::new();
        std::io::Read::read_to_string(&mut archive.by_name("html/slide_001.html")?, &mut html)?;
        assert_eq!(html, "<p>one</p>");
        Ok(())
    }

    #[test]
    fn export_without_manifest_fails() -> Result<()> {
        let temp = tempfile::tempdir()?;
        assert!(export_from_manifest(temp.path(), &temp.path().join("x.zip")).is_err());
        Ok(())
    }
}
