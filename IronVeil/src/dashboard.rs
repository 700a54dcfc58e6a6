// dashboard.rs
//
// `top`: live view of a booted machine.
//
// q/Esc leaves, l spawns a random batch, a cycles the scheduling algorithm,
// s blocks or wakes a random process.

use std::io;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use log::warn;
use rand::Rng;
use tui::backend::{Backend, CrosstermBackend};
use tui::layout::{Constraint, Direction, Layout, Rect};
use tui::style::{Color, Modifier, Style};
use tui::text::{Span, Spans};
use tui::widgets::{Block, Borders, Gauge, Paragraph, Row, Table};
use tui::{Frame, Terminal};

use nexis::{Algorithm, CacheStats, Kernel, ProcState};

use crate::logger;
use crate::workload;

const ACCENT: Color = Color::Indexed(208);

pub fn run(kernel: &Kernel, rng: &mut impl Rng) -> io::Result<()> {
    enable_raw_mode()?;
    execute!(io::stdout(), EnterAlternateScreen)?;
    logger::set_muted(true);

    let result = event_loop(kernel, rng);

    logger::set_muted(false);
    disable_raw_mode()?;
    execute!(io::stdout(), LeaveAlternateScreen)?;
    result
}

fn event_loop(kernel: &Kernel, rng: &mut impl Rng) -> io::Result<()> {
    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;
    terminal.clear()?;

    loop {
        terminal.draw(|f| draw(f, kernel))?;

        if !event::poll(Duration::from_millis(200))? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => break,
            KeyCode::Char('l') => {
                workload::spawn_random(kernel, rng, 5);
            }
            KeyCode::Char('s') => workload::stir(kernel, rng),
            KeyCode::Char('a') => {
                let current = kernel.scheduler().algorithm();
                let idx = Algorithm::ALL.iter().position(|&a| a == current).unwrap_or(0);
                let next = Algorithm::ALL[(idx + 1) % Algorithm::ALL.len()];
                if let Err(e) = kernel.scheduler().set_algorithm(next) {
                    warn!("Cannot switch to {}: {}", next, e);
                }
            }
            _ => {}
        }
    }

    terminal.show_cursor()?;
    Ok(())
}

fn draw<B: Backend>(f: &mut Frame<B>, kernel: &Kernel) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(5),
            Constraint::Min(5),
        ])
        .split(f.size());

    draw_header(f, rows[0], kernel);
    draw_memory(f, rows[1], kernel);
    draw_caches(f, rows[2], kernel);
    draw_processes(f, rows[3], kernel);
}

fn draw_header<B: Backend>(f: &mut Frame<B>, area: Rect, kernel: &Kernel) {
    let summary = kernel.scheduler().summary();
    let running = summary
        .running
        .map_or_else(|| "idle".to_string(), |pid| pid.to_string());
    let text = Spans::from(vec![
        Span::styled(
            format!(" {} ", kernel.profile().name()),
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(
            "algo {} | clock {} ms | ticks {} (idle {}) | switches {} | running {} | ready {} blocked {} suspended {}",
            summary.algorithm,
            summary.clock_ms,
            summary.ticks,
            summary.idle_ticks,
            summary.context_switches,
            running,
            summary.ready,
            summary.blocked,
            summary.suspended,
        )),
    ]);
    let header = Paragraph::new(text).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" IronVeil top (q quit, l load, s stir, a algo) "),
    );
    f.render_widget(header, area);
}

fn draw_memory<B: Backend>(f: &mut Frame<B>, area: Rect, kernel: &Kernel) {
    let stats = kernel.memory().statistics();
    let label = format!(
        "{} / {} KiB used, {} blocks, {} swapped pages, {} faults",
        stats.used_size / 1024,
        stats.total_size / 1024,
        stats.live_blocks,
        stats.swapped_pages,
        stats.total_page_faults
    );
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(" Memory "))
        .gauge_style(Style::default().fg(ACCENT))
        .ratio(stats.used_ratio().clamp(0.0, 1.0))
        .label(label);
    f.render_widget(gauge, area);
}

fn cache_line(name: &str, stats: &CacheStats) -> Spans<'static> {
    Spans::from(format!(
        "{}  hit {:5.1}%  lines {:>7}/{:<7} hits {:>8} misses {:>8} evictions {:>8}",
        name,
        stats.hit_rate() * 100.0,
        stats.lines,
        stats.capacity_lines,
        stats.hits,
        stats.misses,
        stats.evictions
    ))
}

fn draw_caches<B: Backend>(f: &mut Frame<B>, area: Rect, kernel: &Kernel) {
    let stats = kernel.memory().statistics();
    let text = vec![
        cache_line("L1", &stats.l1),
        cache_line("L2", &stats.l2),
        cache_line("L3", &stats.l3),
    ];
    let caches = Paragraph::new(text).block(Block::default().borders(Borders::ALL).title(" Caches "));
    f.render_widget(caches, area);
}

fn draw_processes<B: Backend>(f: &mut Frame<B>, area: Rect, kernel: &Kernel) {
    let scheduler = kernel.scheduler();
    let stats = scheduler.statistics();
    let current = scheduler.current();

    let rows: Vec<Row> = scheduler
        .processes()
        .into_iter()
        .map(|p| {
            let s = stats.get(&p.pid()).cloned().unwrap_or_default();
            let style = match p.state() {
                ProcState::Running => Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
                ProcState::Blocked | ProcState::Suspended => Style::default().fg(Color::DarkGray),
                _ => Style::default(),
            };
            let marker = if current == Some(p.pid()) { "*" } else { " " };
            Row::new(vec![
                format!("{}{}", marker, p.pid()),
                p.name.clone(),
                p.owner.clone(),
                p.state().to_string(),
                p.priority.to_string(),
                p.nice().to_string(),
                s.total_cpu_time.to_string(),
                s.waiting_time.to_string(),
                s.context_switches.to_string(),
                (p.memory_usage / 1024).to_string(),
                scheduler.vruntime(p.pid()).map_or_else(|| "-".to_string(), |v| v.to_string()),
            ])
            .style(style)
        })
        .collect();

    let widths = [
        Constraint::Length(6),
        Constraint::Length(14),
        Constraint::Length(10),
        Constraint::Length(10),
        Constraint::Length(9),
        Constraint::Length(5),
        Constraint::Length(9),
        Constraint::Length(9),
        Constraint::Length(9),
        Constraint::Length(8),
        Constraint::Length(9),
    ];
    let header = Row::new(vec![
        "PID", "NAME", "OWNER", "STATE", "PRIO", "NICE", "CPU ms", "WAIT ms", "SWITCHES", "MEM KiB", "VRUNTIME",
    ])
    .style(Style::default().fg(ACCENT).add_modifier(Modifier::BOLD));

    let table = Table::new(rows)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(" Processes "))
        .widths(&widths);
    f.render_widget(table, area);
}
