//! Sequence persistence: the project-file tag contract
//!
//! ```text
//! <sequence maxsamples="..." sampleformat="..." numsamples="...">
//!   <waveblock start="...">
//!     <!-- one block-file element, e.g. <simpleblockfile .../> -->
//!   </waveblock>
//! </sequence>
//! ```
//!
//! Reading is tolerant: a waveblock whose block file cannot be rebuilt is
//! replaced by silence, starts are rewritten to be contiguous, and the
//! sample count is reconciled to the sum of block lengths. Every such
//! repair sets the sequence's `error_opening` flag so the host can warn.

use std::io::Write;
use std::sync::Arc;

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use wv_core::{SampleCount, SampleFormat};
use wv_file::{BlockFile, DirManager, SilentBlockFile};

use crate::error::{SeqResult, SequenceError};
use crate::sequence::{SeqBlock, Sequence};

/// Bounds accepted for the `maxsamples` attribute
const MIN_MAX_SAMPLES: i64 = 1024;
const MAX_MAX_SAMPLES: i64 = 64 * 1024 * 1024;

fn xml_err(e: impl std::fmt::Display) -> SequenceError {
    SequenceError::Xml(e.to_string())
}

impl Sequence {
    /// Emit this sequence as a `<sequence>` element.
    ///
    /// Overlong non-alias blocks (legacy data) are truncated here, with a
    /// warning, before their elements are written.
    pub fn write_xml<W: Write>(&self, writer: &mut Writer<W>) -> SeqResult<()> {
        let mut seq_el = BytesStart::new("sequence");
        seq_el.push_attribute(("maxsamples", self.max_samples.to_string().as_str()));
        seq_el.push_attribute(("sampleformat", self.format.code().to_string().as_str()));
        seq_el.push_attribute(("numsamples", self.num_samples.to_string().as_str()));
        writer.write_event(Event::Start(seq_el)).map_err(xml_err)?;

        for bb in &self.blocks {
            // Alias blocks are exempt: converting the sample format
            // changes max_samples but cannot shrink the foreign file
            if !bb.file.is_alias() && bb.file.len() > self.max_samples {
                log::warn!(
                    "Sequence has block file exceeding maximum {} samples per block; \
                     truncating to this maximum length",
                    self.max_samples
                );
                bb.file.set_length(self.max_samples);
            }

            let mut wb = BytesStart::new("waveblock");
            wb.push_attribute(("start", bb.start.to_string().as_str()));
            writer.write_event(Event::Start(wb)).map_err(xml_err)?;

            let el = bb.file.xml_element();
            let mut child = BytesStart::new(el.name);
            for (k, v) in &el.attrs {
                child.push_attribute((*k, v.as_str()));
            }
            writer.write_event(Event::Empty(child)).map_err(xml_err)?;

            writer
                .write_event(Event::End(BytesEnd::new("waveblock")))
                .map_err(xml_err)?;
        }

        writer
            .write_event(Event::End(BytesEnd::new("sequence")))
            .map_err(xml_err)?;
        Ok(())
    }

    /// Convenience wrapper producing a standalone XML string
    pub fn to_xml_string(&self) -> SeqResult<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        self.write_xml(&mut writer)?;
        String::from_utf8(writer.into_inner()).map_err(|e| SequenceError::Xml(e.to_string()))
    }

    /// Parse a `<sequence>` element, delegating block-file elements to
    /// the directory manager, and repair any structural damage found.
    pub fn read_xml(dir: Arc<dyn DirManager>, xml: &str) -> SeqResult<Sequence> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut format = SampleFormat::default();
        let mut max_samples: Option<usize> = None;
        let mut num_samples: SampleCount = 0;
        let mut in_sequence = false;
        let mut error_opening = false;

        // (start, block file) pairs; a missing file is repaired below
        let mut pending: Vec<(SampleCount, Option<Arc<dyn BlockFile>>)> = Vec::new();
        let mut in_waveblock = false;

        loop {
            let event = reader.read_event().map_err(xml_err)?;
            match event {
                Event::Start(ref e) | Event::Empty(ref e) => {
                    let self_closing = matches!(&event, Event::Empty(_));
                    let name = e.name();
                    let mut attrs = Vec::new();
                    for attr in e.attributes() {
                        let attr = attr.map_err(xml_err)?;
                        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                        let value = attr.unescape_value().map_err(xml_err)?.into_owned();
                        attrs.push((key, value));
                    }

                    match name.as_ref() {
                        b"sequence" => {
                            in_sequence = true;
                            for (key, value) in &attrs {
                                match key.as_str() {
                                    "maxsamples" => {
                                        let n: i64 = value.parse().map_err(|_| {
                                            xml_err("bad maxsamples attribute")
                                        })?;
                                        // Sanity range for a per-block
                                        // sample cap
                                        if !(MIN_MAX_SAMPLES..=MAX_MAX_SAMPLES).contains(&n) {
                                            return Err(xml_err(format!(
                                                "maxsamples {n} out of range"
                                            )));
                                        }
                                        max_samples = Some(n as usize);
                                    }
                                    "sampleformat" => {
                                        let code: u32 = value.parse().map_err(|_| {
                                            xml_err("bad sampleformat attribute")
                                        })?;
                                        format = SampleFormat::from_code(code).ok_or_else(
                                            || xml_err(format!("unknown sample format {code}")),
                                        )?;
                                    }
                                    "numsamples" => {
                                        let n: i64 = value.parse().map_err(|_| {
                                            xml_err("bad numsamples attribute")
                                        })?;
                                        if n < 0 {
                                            return Err(xml_err("negative numsamples"));
                                        }
                                        num_samples = n;
                                    }
                                    _ => {}
                                }
                            }
                        }
                        b"waveblock" if in_sequence => {
                            // A childless self-closing waveblock gets
                            // repaired with silence below
                            in_waveblock = !self_closing;
                            let mut start: SampleCount = 0;
                            let mut bad = false;
                            for (key, value) in &attrs {
                                if key == "start" {
                                    match value.parse::<i64>() {
                                        Ok(n) if n >= 0 => start = n,
                                        _ => {
                                            log::warn!(
                                                "waveblock has bad start attribute {value}"
                                            );
                                            bad = true;
                                        }
                                    }
                                }
                            }
                            if bad {
                                error_opening = true;
                            }
                            pending.push((start, None));
                        }
                        tag if in_waveblock => {
                            let tag = String::from_utf8_lossy(tag).into_owned();
                            match dir.load_block_file(&tag, &attrs, format) {
                                Ok(file) => {
                                    if let Some(last) = pending.last_mut() {
                                        last.1 = Some(file);
                                    }
                                }
                                Err(e) => {
                                    log::warn!("could not rebuild block file <{tag}>: {e}");
                                    error_opening = true;
                                }
                            }
                        }
                        _ => {}
                    }
                }
                Event::End(ref e) => match e.name().as_ref() {
                    b"waveblock" => in_waveblock = false,
                    b"sequence" => break,
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
        }

        if !in_sequence {
            return Err(xml_err("no <sequence> element found"));
        }
        let max_samples = max_samples.ok_or_else(|| xml_err("missing maxsamples attribute"))?;

        // Repair pass. First, replace missing block files with silence
        // sized to the gap up to the next block (or the sequence end).
        let nn = pending.len();
        let mut blocks = Vec::with_capacity(nn);
        for b in 0..nn {
            let (start, file) = &pending[b];
            let file = match file {
                Some(f) => Arc::clone(f),
                None => {
                    let mut len = if b < nn - 1 {
                        pending[b + 1].0 - start
                    } else {
                        num_samples - start
                    };
                    len = len.max(0);
                    if len > max_samples as SampleCount {
                        // This could be why the block file failed, so
                        // limit the silent replacement
                        log::warn!(
                            "missing block file with length {len} > maxsamples {max_samples}; \
                             setting length to maxsamples"
                        );
                        len = max_samples as SampleCount;
                    }
                    log::warn!(
                        "gap detected in project file; replacing missing block file with silence"
                    );
                    error_opening = true;
                    SilentBlockFile::new(len as usize, format) as Arc<dyn BlockFile>
                }
            };
            blocks.push(SeqBlock::new(file, *start));
        }

        // Next, make starts contiguous from zero
        let mut pos: SampleCount = 0;
        for block in &mut blocks {
            if block.start != pos {
                log::warn!(
                    "gap detected in project file; start {} is not one sample past the end \
                     of the previous block ({pos}); moving start so blocks are contiguous",
                    block.start
                );
                block.start = pos;
                error_opening = true;
            }
            pos += block.file.len() as SampleCount;
        }
        if num_samples != pos {
            log::warn!(
                "gap detected in project file; correcting sequence sample count from \
                 {num_samples} to {pos}"
            );
            num_samples = pos;
            error_opening = true;
        }

        let mut seq = Sequence::new(dir, format);
        seq.restore_loaded(blocks, num_samples, format, max_samples);
        if error_opening {
            seq.set_error_opening();
        }
        Ok(seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wv_core::f32_to_samples;
    use wv_file::DiskDirManager;

    fn f32_bytes(samples: &[f32]) -> Vec<u8> {
        let mut data = vec![0u8; samples.len() * 4];
        f32_to_samples(samples, SampleFormat::Float, &mut data);
        data
    }

    fn project() -> (tempfile::TempDir, Arc<DiskDirManager>) {
        let dir = tempfile::tempdir().unwrap();
        let mgr = DiskDirManager::new(dir.path().join("project")).unwrap();
        (dir, mgr)
    }

    #[test]
    fn test_write_read_roundtrip() {
        let (_t, mgr) = project();
        let mut seq = Sequence::with_disk_block_size(
            Arc::clone(&mgr) as Arc<dyn DirManager>,
            SampleFormat::Float,
            32,
        );
        let samples: Vec<f32> = (0..20).map(|i| (i as f32 / 20.0) - 0.5).collect();
        seq.append(&f32_bytes(&samples), SampleFormat::Float, 20).unwrap();
        seq.insert_silence(5, 4).unwrap();

        let xml = seq.to_xml_string().unwrap();
        assert!(xml.contains("<sequence"));
        assert!(xml.contains("waveblock"));

        let loaded = Sequence::read_xml(mgr, &xml).unwrap();
        assert!(!loaded.error_opening());
        assert_eq!(loaded.num_samples(), seq.num_samples());
        assert_eq!(loaded.sample_format(), SampleFormat::Float);
        assert_eq!(loaded.max_block_size(), seq.max_block_size());

        let n = seq.num_samples() as usize;
        let mut a = vec![0u8; n * 4];
        let mut b = vec![0u8; n * 4];
        seq.get(&mut a, SampleFormat::Float, 0, n, true).unwrap();
        loaded.get(&mut b, SampleFormat::Float, 0, n, true).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_read_rejects_bad_sequence_attrs() {
        let (_t, mgr) = project();
        let bad_max = r#"<sequence maxsamples="100" sampleformat="262159" numsamples="0"></sequence>"#;
        assert!(Sequence::read_xml(Arc::clone(&mgr) as Arc<dyn DirManager>, bad_max).is_err());

        let bad_format =
            r#"<sequence maxsamples="2048" sampleformat="12345" numsamples="0"></sequence>"#;
        assert!(Sequence::read_xml(Arc::clone(&mgr) as Arc<dyn DirManager>, bad_format).is_err());

        let negative =
            r#"<sequence maxsamples="2048" sampleformat="262159" numsamples="-5"></sequence>"#;
        assert!(Sequence::read_xml(mgr, negative).is_err());
    }

    #[test]
    fn test_missing_block_repaired_with_silence() {
        let (_t, mgr) = project();
        let xml = r#"
            <sequence maxsamples="2048" sampleformat="262159" numsamples="3000">
              <waveblock start="0">
                <silentblockfile len="1000"/>
              </waveblock>
              <waveblock start="1000">
                <simpleblockfile filename="does-not-exist.wvb" len="1000"/>
              </waveblock>
              <waveblock start="2000">
                <silentblockfile len="1000"/>
              </waveblock>
            </sequence>"#;

        let seq = Sequence::read_xml(mgr, xml).unwrap();
        assert!(seq.error_opening());
        assert_eq!(seq.num_samples(), 3000);
        assert_eq!(seq.blocks().len(), 3);
        // The middle entry became silence covering the gap
        assert_eq!(seq.blocks()[1].file.len(), 1000);
        assert!(seq.blocks()[1].file.file_name().is_none());
    }

    #[test]
    fn test_discontiguous_starts_rewritten() {
        let (_t, mgr) = project();
        let xml = r#"
            <sequence maxsamples="2048" sampleformat="262159" numsamples="2000">
              <waveblock start="0">
                <silentblockfile len="1000"/>
              </waveblock>
              <waveblock start="1500">
                <silentblockfile len="1000"/>
              </waveblock>
            </sequence>"#;

        let seq = Sequence::read_xml(mgr, xml).unwrap();
        assert!(seq.error_opening());
        assert_eq!(seq.blocks()[1].start, 1000);
        assert_eq!(seq.num_samples(), 2000);
    }

    #[test]
    fn test_numsamples_reconciled() {
        let (_t, mgr) = project();
        let xml = r#"
            <sequence maxsamples="2048" sampleformat="262159" numsamples="9999">
              <waveblock start="0">
                <silentblockfile len="1024"/>
              </waveblock>
            </sequence>"#;

        let seq = Sequence::read_xml(mgr, xml).unwrap();
        assert!(seq.error_opening());
        assert_eq!(seq.num_samples(), 1024);
    }

    #[test]
    fn test_overlong_missing_block_capped() {
        let (_t, mgr) = project();
        // The missing block's gap (5000) exceeds maxsamples (2048)
        let xml = r#"
            <sequence maxsamples="2048" sampleformat="262159" numsamples="5000">
              <waveblock start="0">
                <simpleblockfile filename="gone.wvb" len="5000"/>
              </waveblock>
            </sequence>"#;

        let seq = Sequence::read_xml(mgr, xml).unwrap();
        assert!(seq.error_opening());
        assert_eq!(seq.blocks()[0].file.len(), 2048);
        // And the total was then reconciled to the actual sum
        assert_eq!(seq.num_samples(), 2048);
    }

    #[test]
    fn test_write_truncates_overlong_block() {
        let (_t, mgr) = project();
        let mut seq = Sequence::with_disk_block_size(
            Arc::clone(&mgr) as Arc<dyn DirManager>,
            SampleFormat::Float,
            32,
        );
        seq.append(&f32_bytes(&[0.5; 8]), SampleFormat::Float, 8).unwrap();

        // Simulate a legacy oversized block by shrinking the cap
        // through format conversion bookkeeping: instead, write a block
        // longer than max by hand
        let long: Arc<dyn BlockFile> = {
            let mut data = vec![0u8; 12 * 4];
            f32_to_samples(&[0.25; 12], SampleFormat::Float, &mut data);
            wv_file::SimpleBlockFile::new(
                mgr.project_dir().join("long.wvb"),
                &data,
                12,
                SampleFormat::Float,
            )
            .unwrap()
        };
        seq.append_block_file(long).unwrap();
        assert_eq!(seq.num_samples(), 20);

        let xml = seq.to_xml_string().unwrap();
        // The oversized block was truncated to max_samples on write
        assert!(xml.contains("len=\"8\""));
        assert!(!xml.contains("len=\"12\""));
        assert_eq!(seq.blocks()[1].file.len(), 8);
    }
}
