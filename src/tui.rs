use anyhow::Result;
use chrono::{DateTime, Utc};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
};
use std::collections::HashSet;
use std::io::stdout;

use crate::db::Database;
use crate::error::BoardError;
use crate::format::{expires_in, or_dash, posted_ago, truncate};
use crate::jobs::JobFilter;
use crate::models::{JobType, JobWithCompany};

struct AppState {
    jobs: Vec<JobWithCompany>,
    selected: usize,
    scroll_offset: u16,
    /// Signed-in seeker, if any; enables applying from the browser.
    seeker_id: Option<i64>,
    applied: HashSet<i64>,
    message: Option<String>,
    now: DateTime<Utc>,
}

impl AppState {
    fn new(jobs: Vec<JobWithCompany>, seeker_id: Option<i64>, applied: HashSet<i64>) -> Self {
        Self {
            jobs,
            selected: 0,
            scroll_offset: 0,
            seeker_id,
            applied,
            message: None,
            now: Utc::now(),
        }
    }

    fn current(&self) -> Option<&JobWithCompany> {
        self.jobs.get(self.selected)
    }

    fn next(&mut self) {
        if !self.jobs.is_empty() && self.selected < self.jobs.len() - 1 {
            self.selected += 1;
            self.scroll_offset = 0;
        }
    }

    fn prev(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
            self.scroll_offset = 0;
        }
    }

    fn scroll_down(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_add(3);
    }

    fn scroll_up(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_sub(3);
    }

    fn apply_to_current(&mut self, db: &Database) {
        let Some(job_id) = self.current().map(|j| j.job.id) else { return };
        let Some(seeker_id) = self.seeker_id else {
            self.message = Some("Sign in as a job seeker to apply".to_string());
            return;
        };
        self.message = Some(match db.apply(seeker_id, job_id, None) {
            Ok(_) => {
                self.applied.insert(job_id);
                "Application sent! The employer will review your profile.".to_string()
            }
            Err(e) => match e.downcast_ref::<BoardError>() {
                Some(board) => board.to_string(),
                None => {
                    tracing::error!(error = ?e, job_id, "Apply from browser failed");
                    "Something went wrong".to_string()
                }
            },
        });
    }
}

pub fn run_browse(db: &Database, filter: &JobFilter, seeker_id: Option<i64>) -> Result<()> {
    let jobs = db.list_open_jobs(filter, Utc::now())?;
    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    let mut applied = HashSet::new();
    if let Some(id) = seeker_id {
        for job in &jobs {
            if db.has_applied(id, job.job.id)? {
                applied.insert(job.job.id);
            }
        }
    }
    let mut state = AppState::new(jobs, seeker_id, applied);

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let result = run_loop(&mut terminal, &mut state, db);

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    state: &mut AppState,
    db: &Database,
) -> Result<()> {
    let mut list_state = ListState::default();
    list_state.select(Some(0));

    loop {
        terminal.draw(|frame| draw(frame, state, &mut list_state))?;

        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            let prev_selected = state.selected;
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => break,
                KeyCode::Down | KeyCode::Char('j') => state.next(),
                KeyCode::Up | KeyCode::Char('k') => state.prev(),
                KeyCode::Char('J') | KeyCode::PageDown => state.scroll_down(),
                KeyCode::Char('K') | KeyCode::PageUp => state.scroll_up(),
                KeyCode::Char('a') => state.apply_to_current(db),
                _ => {}
            }
            if state.selected != prev_selected {
                list_state.select(Some(state.selected));
                state.message = None;
            }
        }
    }
    Ok(())
}

fn type_label(job_type: JobType) -> &'static str {
    match job_type {
        JobType::Remote => "Remote",
        JobType::Onsite => "On-site",
        JobType::Hybrid => "Hybrid",
    }
}

fn draw(frame: &mut Frame, state: &AppState, list_state: &mut ListState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1)])
        .split(frame.area());

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
        .split(rows[0]);

    // Left panel: listings
    let items: Vec<ListItem> = state
        .jobs
        .iter()
        .map(|entry| {
            let marker = if state.applied.contains(&entry.job.id) { "+" } else { " " };
            ListItem::new(format!(
                "{} {} | {}",
                marker,
                truncate(&entry.job.title, 32),
                truncate(&entry.company.name, 20)
            ))
        })
        .collect();

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(format!(
            " Open jobs ({}) ",
            state.jobs.len()
        )))
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, chunks[0], list_state);

    // Right panel: listing detail
    let detail_widget = Paragraph::new(build_detail(state))
        .block(Block::default().borders(Borders::ALL).title(" Detail "))
        .wrap(Wrap { trim: false })
        .scroll((state.scroll_offset, 0));

    frame.render_widget(detail_widget, chunks[1]);

    // Footer: last action result, else key help
    let footer = match &state.message {
        Some(message) => Paragraph::new(format!(" {message}")).style(Style::default().fg(Color::Yellow)),
        None => Paragraph::new(" j/k:navigate  J/K:scroll  a:apply  q:quit")
            .style(Style::default().fg(Color::DarkGray)),
    };
    frame.render_widget(footer, rows[1]);
}

fn build_detail(state: &AppState) -> Text<'_> {
    let Some(JobWithCompany { job, company }) = state.current() else {
        return Text::raw("No job selected");
    };

    let mut lines: Vec<Line> = Vec::new();

    lines.push(Line::from(Span::styled(
        job.title.as_str(),
        Style::default().add_modifier(Modifier::BOLD),
    )));
    lines.push(Line::from(format!("at {}", company.name)));

    let mut meta = vec![type_label(job.job_type).to_string()];
    if let Some(location) = &job.location {
        meta.push(location.clone());
    }
    meta.push(format!("posted {}", posted_ago(job.created_at, state.now)));
    if let Some(left) = expires_in(job.expires_at, state.now) {
        meta.push(left);
    }
    lines.push(Line::from(Span::styled(
        meta.join(" | "),
        Style::default().fg(Color::Cyan),
    )));

    if let Some(salary) = &job.salary_range {
        lines.push(Line::from(format!("Salary: {salary}")));
    }
    if state.applied.contains(&job.id) {
        lines.push(Line::from(Span::styled(
            "You have applied to this job",
            Style::default().fg(Color::Green),
        )));
    }

    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "Description",
        Style::default().add_modifier(Modifier::BOLD),
    )));
    for line in job.description.lines() {
        lines.push(Line::from(line.to_string()));
    }

    let has_contact = job.contact_name.is_some() || job.contact_phone.is_some() || job.contact_email.is_some();
    if has_contact {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            "Contact",
            Style::default().add_modifier(Modifier::BOLD),
        )));
        lines.push(Line::from(format!("  Name:  {}", or_dash(job.contact_name.as_deref()))));
        lines.push(Line::from(format!("  Phone: {}", or_dash(job.contact_phone.as_deref()))));
        lines.push(Line::from(format!("  Email: {}", or_dash(job.contact_email.as_deref()))));
    }

    if company.sector.is_some() || company.website.is_some() || company.description.is_some() {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            format!("About {}", company.name),
            Style::default().add_modifier(Modifier::BOLD),
        )));
        if let Some(sector) = &company.sector {
            lines.push(Line::from(format!("  Sector:  {sector}")));
        }
        if let Some(website) = &company.website {
            lines.push(Line::from(format!("  Website: {website}")));
        }
        if let Some(description) = &company.description {
            for line in textwrap::fill(description, 70).lines() {
                lines.push(Line::from(format!("  {line}")));
            }
        }
    }

    Text::from(lines)
}
