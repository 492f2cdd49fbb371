//! Terminal renderer.
//!
//! On a terminal, every tick redraws one section per process in place.
//! Otherwise (pipes, CI logs) a section is printed only when a process
//! changes status, so the log stays readable.

use std::collections::{BTreeMap, HashMap};
use std::io::{self, IsTerminal, Stdout, Write};

use crossterm::cursor::MoveToPreviousLine;
use crossterm::queue;
use crossterm::style::{Print, Stylize};
use crossterm::terminal::{self, Clear, ClearType};

use crate::source::Command;
use crate::subprocess::ProcessStatus;
use crate::supervisor::RunSummary;

use super::format::format_duration;
use super::{OutputMode, ProcessReport, Renderer};

const DEFAULT_WIDTH: usize = 120;
const DEFAULT_HEIGHT: usize = 40;

pub struct ConsoleRenderer<W: Write> {
    out: W,
    interactive: bool,
    width: usize,
    height: usize,
    /// Lines of the latest section per process, keyed by launch index.
    sections: BTreeMap<usize, Vec<String>>,
    /// Height of the frame currently on screen.
    drawn_lines: usize,
    printed_status: HashMap<usize, ProcessStatus>,
}

impl ConsoleRenderer<Stdout> {
    /// Render to stdout, redrawing in place when it is a terminal.
    pub fn stdout() -> Self {
        let out = io::stdout();
        let interactive = out.is_terminal();
        let (width, height) = terminal::size().map_or((DEFAULT_WIDTH, DEFAULT_HEIGHT), |(w, h)| {
            (usize::from(w), usize::from(h))
        });
        Self::new(out, interactive, width, height)
    }
}

impl<W: Write> ConsoleRenderer<W> {
    pub fn new(out: W, interactive: bool, width: usize, height: usize) -> Self {
        Self {
            out,
            interactive,
            width: width.max(20),
            height: height.max(2),
            sections: BTreeMap::new(),
            drawn_lines: 0,
            printed_status: HashMap::new(),
        }
    }

    /// Whether sections are redrawn in place.
    pub const fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub const fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn section(&self, report: &ProcessReport) -> Vec<String> {
        let mut lines = vec![self.header(report)];

        let title = match (report.status, report.output_mode) {
            (ProcessStatus::Error, _) => "last output:".to_string(),
            (_, OutputMode::Tail(rows)) => format!("last {rows} output rows:"),
            (_, OutputMode::Full) => "output:".to_string(),
        };
        lines.push(title);
        lines.extend(
            report
                .output
                .lines()
                .map(|row| truncate(&format!("  {row}"), self.width)),
        );
        lines.push("----".to_string());
        lines
    }

    fn header(&self, report: &ProcessReport) -> String {
        let plain = format!(
            "{}: {} --- runtime: {} --- last update: {}",
            report.command_line, report.status, report.runtime, report.last_update
        );
        if !self.interactive || plain.chars().count() > self.width {
            return truncate(&plain, self.width);
        }
        format!(
            "{}: {} --- runtime: {} --- last update: {}",
            report.command_line.as_str().yellow(),
            styled_status(report.status),
            report.runtime.as_str().dark_grey(),
            report.last_update.as_str().dark_grey()
        )
    }

    fn write_lines(&mut self, lines: &[String]) -> io::Result<()> {
        for line in lines {
            queue!(self.out, Print(line), Print("\n"))?;
        }
        Ok(())
    }

    fn redraw(&mut self) -> io::Result<()> {
        if self.drawn_lines > 0 {
            let up = u16::try_from(self.drawn_lines).unwrap_or(u16::MAX);
            queue!(self.out, MoveToPreviousLine(up), Clear(ClearType::FromCursorDown))?;
        }

        let frame: Vec<String> = self.sections.values().flatten().cloned().collect();
        // Lines scrolled off the top can't be reached by the cursor again.
        let visible = frame.len().min(self.height - 1);
        let frame = &frame[frame.len() - visible..];
        self.write_lines(frame)?;
        self.drawn_lines = visible;
        self.out.flush()
    }
}

impl<W: Write> Renderer for ConsoleRenderer<W> {
    fn overview(&mut self, commands: &[Command]) -> io::Result<()> {
        let mut lines = vec![
            "Overview".to_string(),
            "========".to_string(),
            format!("{} Commands to Run Found.", commands.len()),
        ];
        lines.extend(
            commands
                .iter()
                .map(|c| truncate(&format!(" * {c}"), self.width)),
        );
        lines.push(String::new());
        self.write_lines(&lines)?;
        self.out.flush()
    }

    fn report(&mut self, report: &ProcessReport) -> io::Result<()> {
        let section = self.section(report);
        if self.interactive {
            self.sections.insert(report.index, section);
            return Ok(());
        }
        if self.printed_status.get(&report.index) != Some(&report.status) {
            self.printed_status.insert(report.index, report.status);
            self.write_lines(&section)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.interactive {
            self.redraw()
        } else {
            self.out.flush()
        }
    }

    fn summary(&mut self, summary: &RunSummary) -> io::Result<()> {
        let line = format!(
            "Finished {} of {} commands in {}: {} done, {} error, {} terminated, {} not started",
            summary.total_started,
            summary.total_commands,
            format_duration(summary.elapsed),
            summary.done,
            summary.errored,
            summary.terminated,
            summary.not_started()
        );
        self.drawn_lines = 0;
        queue!(self.out, Print("\n"), Print(line), Print("\n"))?;
        self.out.flush()
    }
}

fn styled_status(status: ProcessStatus) -> String {
    let label = status.label();
    match status {
        ProcessStatus::Running => label.green().to_string(),
        ProcessStatus::Done => label.black().on_green().to_string(),
        ProcessStatus::Terminated => label.black().on_yellow().to_string(),
        ProcessStatus::Error => label.red().to_string(),
    }
}

fn truncate(line: &str, width: usize) -> String {
    if line.chars().count() <= width {
        return line.to_string();
    }
    let mut cut: String = line.chars().take(width.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}
