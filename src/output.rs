//! Output formatting for search results

use crate::model::{FoundBlob, MatchLine};
use crate::query::SearchResults;
use std::io::{self, Write};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Print aggregated results in a grep-style format with file headings.
pub fn print_results(results: &SearchResults, color: bool) -> io::Result<()> {
    let choice = if color {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    };
    let mut stdout = StandardStream::stdout(choice);

    for (i, blob) in results.blobs.iter().enumerate() {
        if i > 0 {
            writeln!(stdout)?;
        }
        print_blob(&mut stdout, blob)?;
    }

    print_summary(&mut stdout, results)?;

    Ok(())
}

fn print_blob(stdout: &mut StandardStream, blob: &FoundBlob) -> io::Result<()> {
    // Filename header
    stdout.set_color(ColorSpec::new().set_fg(Some(Color::Magenta)).set_bold(true))?;
    writeln!(stdout, "{}: {}", blob.project_path, blob.path)?;
    stdout.reset()?;

    for (i, chunk) in blob.chunks.iter().enumerate() {
        if i > 0 {
            stdout.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)))?;
            writeln!(stdout, "--")?;
            stdout.reset()?;
        }
        for line in &chunk.lines {
            print_match_line(stdout, line)?;
        }
    }

    if blob.truncated() {
        stdout.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)))?;
        writeln!(
            stdout,
            "... {} more matches not shown",
            blob.match_count_total - blob.match_count
        )?;
        stdout.reset()?;
    }

    Ok(())
}

fn print_match_line(stdout: &mut StandardStream, line: &MatchLine) -> io::Result<()> {
    stdout.set_color(ColorSpec::new().set_fg(Some(Color::Green)))?;
    write!(stdout, "{}", line.line_number)?;
    stdout.reset()?;
    write!(stdout, ":")?;

    // Highlighted spans arrive as <mark> tags in rich_text
    for (highlighted, segment) in mark_segments(&line.rich_text) {
        if highlighted {
            stdout.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true))?;
            write!(stdout, "{}", segment)?;
            stdout.reset()?;
        } else {
            write!(stdout, "{}", segment)?;
        }
    }
    writeln!(stdout)?;

    Ok(())
}

fn print_summary(stdout: &mut StandardStream, results: &SearchResults) -> io::Result<()> {
    if !results.blobs.is_empty() {
        writeln!(stdout)?;
    }
    writeln!(
        stdout,
        "{} matches in {} files ({} found)",
        results.match_count, results.file_count, results.match_count_total
    )?;

    if results.timed_out {
        stdout.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)))?;
        writeln!(stdout, "search timed out; results are partial")?;
        stdout.reset()?;
    }
    for failure in &results.failures {
        stdout.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)))?;
        writeln!(stdout, "node {} skipped: {}", failure.node, failure.message)?;
        stdout.reset()?;
    }

    Ok(())
}

/// Split rich text into (highlighted, segment) pairs.
fn mark_segments(rich: &str) -> Vec<(bool, &str)> {
    let mut segments = Vec::new();
    let mut rest = rich;

    while let Some(start) = rest.find("<mark>") {
        if start > 0 {
            segments.push((false, &rest[..start]));
        }
        rest = &rest[start + 6..];
        match rest.find("</mark>") {
            Some(end) => {
                segments.push((true, &rest[..end]));
                rest = &rest[end + 7..];
            }
            None => {
                // Unterminated tag, emit as-is
                segments.push((false, rest));
                return segments;
            }
        }
    }

    if !rest.is_empty() {
        segments.push((false, rest));
    }
    segments
}
