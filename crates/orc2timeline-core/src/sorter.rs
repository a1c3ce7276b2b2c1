//! Bounded-memory external sort.
//!
//! Encoded lines are buffered up to the configured chunk size, then sorted,
//! de-duplicated and spilled to a run file. Finalisation merges every run with
//! a min-heap into one fully sorted, de-duplicated partial timeline. Merges
//! are batched so no pass holds more than [`MAX_OPEN_MERGE_FILES`] readers,
//! which keeps the process under Windows' 512 stdio-handle ceiling.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const MAX_OPEN_MERGE_FILES: usize = 300;

/// Per-instance sorter spilling to `run_dir`.
#[derive(Debug)]
pub struct ExternalSorter {
    chunk: Vec<String>,
    chunk_size: usize,
    run_dir: PathBuf,
    runs: Vec<PathBuf>,
    pushed: u64,
}

impl ExternalSorter {
    pub fn new(run_dir: &Path, chunk_size: usize) -> Self {
        Self {
            chunk: Vec::new(),
            chunk_size: chunk_size.max(1),
            run_dir: run_dir.to_path_buf(),
            runs: Vec::new(),
            pushed: 0,
        }
    }

    /// Buffer one encoded line, spilling synchronously when the chunk is
    /// full. This is the backpressure point: a producing plugin blocks here
    /// until the spill completes.
    pub fn push(&mut self, line: String) -> io::Result<()> {
        self.chunk.push(line);
        self.pushed += 1;
        if self.chunk.len() >= self.chunk_size {
            self.spill()?;
        }
        Ok(())
    }

    /// Total number of lines accepted so far.
    pub fn pushed(&self) -> u64 {
        self.pushed
    }

    fn spill(&mut self) -> io::Result<()> {
        if self.chunk.is_empty() {
            return Ok(());
        }
        self.chunk.sort_unstable();
        self.chunk.dedup();

        std::fs::create_dir_all(&self.run_dir)?;
        let run_path = self.run_dir.join(format!("run_{:05}", self.runs.len()));
        let mut writer = BufWriter::new(File::create(&run_path)?);
        for line in &self.chunk {
            writeln!(writer, "{line}")?;
        }
        writer.flush()?;
        self.runs.push(run_path);
        self.chunk.clear();
        Ok(())
    }

    /// Flush the residual chunk and merge every run into `output_path`,
    /// deleting the runs as they are consumed. Returns the number of unique
    /// lines written.
    pub fn finish(mut self, output_path: &Path) -> io::Result<u64> {
        self.spill()?;
        let mut writer = BufWriter::new(File::create(output_path)?);
        let count = merge_sorted_files(&self.runs, &mut writer, &self.run_dir)?;
        writer.flush()?;
        for run in &self.runs {
            let _ = std::fs::remove_file(run);
        }
        Ok(count)
    }
}

/// K-way merge of sorted line files into `sink`, dropping byte-identical
/// adjacent lines. Inputs beyond the open-file budget are first folded into
/// intermediate files under `scratch`. Returns the number of unique lines.
pub fn merge_sorted_files(
    inputs: &[PathBuf],
    sink: &mut dyn Write,
    scratch: &Path,
) -> io::Result<u64> {
    let mut pending: Vec<PathBuf> = inputs.to_vec();
    let mut intermediates: Vec<PathBuf> = Vec::new();

    while pending.len() > MAX_OPEN_MERGE_FILES {
        let batch: Vec<PathBuf> = pending.drain(..MAX_OPEN_MERGE_FILES).collect();
        std::fs::create_dir_all(scratch)?;
        let staged = scratch.join(format!("merge_{:05}", intermediates.len()));
        let mut writer = BufWriter::new(File::create(&staged)?);
        merge_batch(&batch, &mut writer)?;
        writer.flush()?;
        pending.push(staged.clone());
        intermediates.push(staged);
    }

    let count = merge_batch(&pending, sink)?;
    for staged in intermediates {
        let _ = std::fs::remove_file(staged);
    }
    Ok(count)
}

fn merge_batch(inputs: &[PathBuf], sink: &mut dyn Write) -> io::Result<u64> {
    let mut readers: Vec<io::Lines<BufReader<File>>> = Vec::with_capacity(inputs.len());
    for input in inputs {
        readers.push(BufReader::new(File::open(input)?).lines());
    }

    let mut heap: BinaryHeap<Reverse<(String, usize)>> = BinaryHeap::with_capacity(readers.len());
    for (index, reader) in readers.iter_mut().enumerate() {
        if let Some(line) = reader.next().transpose()? {
            heap.push(Reverse((line, index)));
        }
    }

    let mut previous: Option<String> = None;
    let mut count = 0u64;
    while let Some(Reverse((line, index))) = heap.pop() {
        if previous.as_deref() != Some(line.as_str()) {
            sink.write_all(line.as_bytes())?;
            sink.write_all(b"\n")?;
            count += 1;
            previous = Some(line);
        }
        if let Some(next) = readers[index].next().transpose()? {
            heap.push(Reverse((next, index)));
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn read_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn tiny_chunks_produce_globally_sorted_output() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("partial");
        let mut sorter = ExternalSorter::new(&dir.path().join("runs"), 3);

        let lines = [
            "2020-01-07 x", "2020-01-03 x", "2020-01-09 x", "2020-01-01 x", "2020-01-05 x",
            "2020-01-02 x", "2020-01-08 x", "2020-01-04 x", "2020-01-10 x", "2020-01-06 x",
        ];
        for line in lines {
            sorter.push(line.to_string()).unwrap();
        }
        let count = sorter.finish(&out).unwrap();

        let mut expected: Vec<String> = lines.iter().map(|s| s.to_string()).collect();
        expected.sort();
        assert_eq!(read_lines(&out), expected);
        assert_eq!(count, 10);
    }

    #[test]
    fn duplicates_within_and_across_chunks_collapse() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("partial");
        let mut sorter = ExternalSorter::new(&dir.path().join("runs"), 2);

        for line in ["b", "a", "b", "a", "b", "c"] {
            sorter.push(line.to_string()).unwrap();
        }
        let count = sorter.finish(&out).unwrap();
        assert_eq!(read_lines(&out), vec!["a", "b", "c"]);
        assert_eq!(count, 3);
        assert_eq!(
            std::fs::read_dir(dir.path().join("runs")).unwrap().count(),
            0,
            "runs are deleted after the merge"
        );
    }

    #[test]
    fn empty_sorter_writes_empty_partial() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("partial");
        let sorter = ExternalSorter::new(&dir.path().join("runs"), 10);
        let count = sorter.finish(&out).unwrap();
        assert_eq!(count, 0);
        assert_eq!(std::fs::read(&out).unwrap().len(), 0);
    }

    #[test]
    fn merge_handles_many_inputs_with_batching() {
        let dir = tempdir().unwrap();
        // More input files than the open-file budget; two lines each.
        let mut inputs = Vec::new();
        for i in 0..(MAX_OPEN_MERGE_FILES + 7) {
            let path = dir.path().join(format!("in_{i:04}"));
            std::fs::write(&path, format!("{:08}\n{:08}\n", i * 2, i * 2 + 1)).unwrap();
            inputs.push(path);
        }
        let mut out: Vec<u8> = Vec::new();
        let scratch = dir.path().join("scratch");
        let count = merge_sorted_files(&inputs, &mut out, &scratch).unwrap();
        assert_eq!(count as usize, (MAX_OPEN_MERGE_FILES + 7) * 2);
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines.windows(2).all(|w| w[0] < w[1]));
    }
}
