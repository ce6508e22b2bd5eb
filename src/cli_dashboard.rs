//! Tasks (latest 20 with lifecycle timestamps)
//! Workers (liveness table)
//! Metrics (per-status counts and average execution time)

use std::{
  error::Error,
  io,
  sync::mpsc,
  thread,
  time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use crossterm::{
  event::{self, DisableMouseCapture, EnableMouseCapture, Event as CEvent, KeyCode},
  execute,
  terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use taskflow::{
  config::Config,
  database::setup_database,
  metrics::TaskMetrics,
  models::{Task, TaskStatus, Worker, WorkerStatus},
  store::{PgStore, Store},
};
use tokio::runtime::Runtime;
use tui::{
  backend::{Backend, CrosstermBackend},
  layout::{Constraint, Direction, Layout, Rect},
  style::{Color, Modifier, Style},
  text::{Span, Spans},
  widgets::{Block, Borders, List, ListItem, Paragraph, Tabs},
  Terminal,
};

const REFRESH: Duration = Duration::from_secs(2);
const RECENT_TASKS: i64 = 20;

#[derive(Clone, Copy)]
enum DashboardTab {
  Tasks,
  Workers,
  Metrics,
}

struct Snapshot {
  tasks: Vec<Task>,
  workers: Vec<Worker>,
  metrics: TaskMetrics,
}

struct App {
  current_tab: DashboardTab,
  snapshot: Option<Snapshot>,
  error: Option<String>,
}

impl App {
  fn new() -> Self {
    Self { current_tab: DashboardTab::Tasks, snapshot: None, error: None }
  }

  fn next_tab(&mut self) {
    self.current_tab = match self.current_tab {
      DashboardTab::Tasks => DashboardTab::Workers,
      DashboardTab::Workers => DashboardTab::Metrics,
      DashboardTab::Metrics => DashboardTab::Tasks,
    }
  }

  fn previous_tab(&mut self) {
    self.current_tab = match self.current_tab {
      DashboardTab::Tasks => DashboardTab::Metrics,
      DashboardTab::Workers => DashboardTab::Tasks,
      DashboardTab::Metrics => DashboardTab::Workers,
    }
  }

  fn apply(&mut self, update: Result<Snapshot, String>) {
    match update {
      Ok(snapshot) => {
        self.snapshot = Some(snapshot);
        self.error = None;
      }
      Err(e) => self.error = Some(e),
    }
  }
}

async fn fetch_snapshot(store: &PgStore) -> taskflow::error::Result<Snapshot> {
  let tasks = store.recent_tasks(RECENT_TASKS).await?;
  let workers = store.list_workers().await?;
  let metrics = TaskMetrics::from_tasks(&store.list_tasks().await?);
  Ok(Snapshot { tasks, workers, metrics })
}

/// Polls the store on its own runtime and forwards snapshots to the UI thread.
fn spawn_poller(database_url: String, tx: mpsc::Sender<Result<Snapshot, String>>) {
  thread::spawn(move || {
    let rt = match Runtime::new() {
      Ok(rt) => rt,
      Err(e) => {
        let _ = tx.send(Err(format!("runtime: {}", e)));
        return;
      }
    };
    let store = match rt.block_on(setup_database(&database_url)) {
      Ok(pool) => PgStore::new(pool),
      Err(e) => {
        let _ = tx.send(Err(format!("database: {}", e)));
        return;
      }
    };
    loop {
      let update = rt.block_on(fetch_snapshot(&store)).map_err(|e| e.to_string());
      if tx.send(update).is_err() {
        break;
      }
      thread::sleep(REFRESH);
    }
  });
}

fn main() -> Result<(), Box<dyn Error>> {
  let config = Config::from_env()?;

  enable_raw_mode()?;
  let mut stdout = io::stdout();
  execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
  let backend = CrosstermBackend::new(stdout);
  let mut terminal = Terminal::new(backend)?;

  let (tx, rx) = mpsc::channel();
  spawn_poller(config.database_url.clone(), tx);

  let mut app = App::new();
  let tick_rate = Duration::from_millis(500);
  let mut last_tick = Instant::now();

  loop {
    while let Ok(update) = rx.try_recv() {
      app.apply(update);
    }
    terminal.draw(|f| ui(f, &app))?;

    let timeout = tick_rate
      .checked_sub(last_tick.elapsed())
      .unwrap_or_else(|| Duration::from_secs(0));
    if event::poll(timeout)? {
      if let CEvent::Key(key) = event::read()? {
        match key.code {
          KeyCode::Char('q') => break,
          KeyCode::Right => app.next_tab(),
          KeyCode::Left => app.previous_tab(),
          _ => {}
        }
      }
    }
    if last_tick.elapsed() >= tick_rate {
      last_tick = Instant::now();
    }
  }

  disable_raw_mode()?;
  execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
  terminal.show_cursor()?;
  Ok(())
}

fn ui<B: Backend>(f: &mut tui::Frame<B>, app: &App) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .margin(1)
    .constraints([
      Constraint::Length(3),
      Constraint::Min(0),
      Constraint::Length(3),
    ].as_ref())
    .split(f.size());

  let tab_titles = vec!["Tasks", "Workers", "Metrics"];
  let tabs = Tabs::new(
    tab_titles
      .iter()
      .map(|t| Spans::from(Span::styled(*t, Style::default().fg(Color::Yellow))))
      .collect(),
  )
    .block(Block::default().borders(Borders::ALL).title("Taskflow"))
    .highlight_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
    .select(match app.current_tab {
      DashboardTab::Tasks => 0,
      DashboardTab::Workers => 1,
      DashboardTab::Metrics => 2,
    });
  f.render_widget(tabs, chunks[0]);

  match &app.snapshot {
    Some(snapshot) => match app.current_tab {
      DashboardTab::Tasks => render_tasks(f, snapshot, chunks[1]),
      DashboardTab::Workers => render_workers(f, snapshot, chunks[1]),
      DashboardTab::Metrics => render_metrics(f, snapshot, chunks[1]),
    },
    None => {
      let waiting = Paragraph::new("Waiting for first snapshot...")
        .block(Block::default().borders(Borders::ALL));
      f.render_widget(waiting, chunks[1]);
    }
  }

  let footer_text = match &app.error {
    Some(e) => format!("Store error: {} | ←/→: Switch Tabs | q: Quit", e),
    None => "←/→: Switch Tabs | q: Quit".to_string(),
  };
  let footer_color = if app.error.is_some() { Color::Red } else { Color::White };
  let footer = Paragraph::new(footer_text)
    .style(Style::default().fg(footer_color))
    .block(Block::default().borders(Borders::ALL));
  f.render_widget(footer, chunks[2]);
}

fn status_color(status: TaskStatus) -> Color {
  match status {
    TaskStatus::Done => Color::Green,
    TaskStatus::Failed => Color::Red,
    TaskStatus::Running => Color::Cyan,
    TaskStatus::Retrying => Color::Yellow,
    TaskStatus::Scheduled => Color::White,
  }
}

fn stamp(at: Option<DateTime<Utc>>) -> String {
  at.map(|t| t.format("%H:%M:%S").to_string()).unwrap_or_else(|| "-".into())
}

fn render_tasks<B: Backend>(f: &mut tui::Frame<B>, snapshot: &Snapshot, area: Rect) {
  let items: Vec<ListItem> = snapshot.tasks.iter().map(|t| {
    ListItem::new(vec![
      Spans::from(vec![
        Span::styled(format!("#{} ", t.id), Style::default().add_modifier(Modifier::BOLD)),
        Span::styled(format!("{:<9}", t.status), Style::default().fg(status_color(t.status))),
        Span::raw(format!(" {}", t.command)),
      ]),
      Spans::from(Span::raw(format!(
        "   scheduled {} | started {} | done {} | failed {} | retries {}",
        stamp(Some(t.scheduled_at)),
        stamp(t.started_at),
        stamp(t.completed_at),
        stamp(t.failed_at),
        t.retry_count,
      ))),
    ])
  }).collect();
  let list = List::new(items)
    .block(Block::default().borders(Borders::ALL).title(format!("Latest {} Tasks", RECENT_TASKS)));
  f.render_widget(list, area);
}

fn render_workers<B: Backend>(f: &mut tui::Frame<B>, snapshot: &Snapshot, area: Rect) {
  let items: Vec<ListItem> = snapshot.workers.iter().map(|w| {
    let color = match w.status {
      WorkerStatus::Alive => Color::Green,
      WorkerStatus::Dead => Color::Red,
    };
    ListItem::new(Spans::from(vec![
      Span::styled(format!("{:<6}", w.status), Style::default().fg(color).add_modifier(Modifier::BOLD)),
      Span::raw(format!(" {} (last heartbeat {})", w.hostname, w.last_heartbeat.format("%Y-%m-%d %H:%M:%S"))),
    ]))
  }).collect();
  let list = List::new(if items.is_empty() { vec![ListItem::new("No workers registered")] } else { items })
    .block(Block::default().borders(Borders::ALL).title("Workers"));
  f.render_widget(list, area);
}

fn render_metrics<B: Backend>(f: &mut tui::Frame<B>, snapshot: &Snapshot, area: Rect) {
  let chunks = Layout::default()
    .direction(Direction::Horizontal)
    .constraints([Constraint::Percentage(50), Constraint::Percentage(50)].as_ref())
    .split(area);

  let m = &snapshot.metrics;
  let summary = vec![
    ListItem::new(format!("Total tasks: {}", m.total_tasks)),
    ListItem::new(format!("Running: {}", m.tasks_running)),
    ListItem::new(format!("Done: {}", m.tasks_done)),
    ListItem::new(format!("Failed: {}", m.tasks_failed)),
    ListItem::new(format!("Avg execution: {:.2}s", m.avg_execution_seconds)),
  ];
  f.render_widget(
    List::new(summary).block(Block::default().borders(Borders::ALL).title("Summary")),
    chunks[0],
  );

  let by_status: Vec<ListItem> = m.tasks_by_status.iter()
    .map(|(status, count)| ListItem::new(format!("{}: {}", status, count)))
    .collect();
  f.render_widget(
    List::new(by_status).block(Block::default().borders(Borders::ALL).title("By Status")),
    chunks[1],
  );
}
