//! Terminal surfaces
//!
//! Rendering lives outside this crate. A computer only needs to reset its
//! terminal between boots, show fatal failures on it and hand it back when
//! it is destroyed. A terminal showing a fatal failure is kept alive past
//! its computer (it becomes orphaned) so the message stays visible.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Default terminal width in cells
pub const DEFAULT_WIDTH: u16 = 51;
/// Default terminal height in cells
pub const DEFAULT_HEIGHT: u16 = 19;
/// Blank cell colors: white on black
pub const DEFAULT_COLORS: u8 = 0xF0;

/// Stock 16-color palette
pub const DEFAULT_PALETTE: [[u8; 3]; 16] = [
    [0xf0, 0xf0, 0xf0],
    [0xf2, 0xb2, 0x33],
    [0xe5, 0x7f, 0xd8],
    [0x99, 0xb2, 0xf2],
    [0xde, 0xde, 0x6c],
    [0x7f, 0xcc, 0x19],
    [0xf2, 0xb2, 0xcc],
    [0x4c, 0x4c, 0x4c],
    [0x99, 0x99, 0x99],
    [0x4c, 0x99, 0xb2],
    [0xb2, 0x66, 0xe5],
    [0x33, 0x66, 0xcc],
    [0x7f, 0x66, 0x4c],
    [0x57, 0xa6, 0x4e],
    [0xcc, 0x4c, 0x4c],
    [0x11, 0x11, 0x11],
];

/// A display attached to one computer
pub trait Terminal: Send + Sync {
    /// Size in cells
    fn size(&self) -> (u16, u16);

    /// Change the size, clearing the contents
    fn resize(&self, width: u16, height: u16);

    /// Write one character cell
    fn write_cell(&self, x: u16, y: u16, ch: char, colors: u8);

    /// Change one palette entry
    fn set_palette(&self, index: u8, rgb: [u8; 3]);

    /// Blank the screen and restore the default palette
    fn reset(&self);

    /// Replace the contents with a fatal failure screen and enter error mode
    fn show_fatal_message(&self, message: &str);

    /// Show a modal message over the terminal
    fn show_message(&self, title: &str, message: &str);

    /// Render in shades of gray instead of color
    fn set_grayscale(&self, grayscale: bool);

    /// Is the terminal rendering in grayscale?
    fn is_grayscale(&self) -> bool;

    /// Is the terminal showing a fatal failure?
    fn is_error_mode(&self) -> bool;

    /// Release the terminal
    fn destroy(&self);
}

/// Creates terminals for new computers
pub trait TerminalFactory: Send + Sync {
    /// Create a terminal, or `None` to run headless
    fn create(&self, id: u32, title: &str) -> Option<Arc<dyn Terminal>>;
}

/// Built-in rendering modes
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// No terminal at all
    #[default]
    Headless,
    /// In-memory character grid
    Buffer,
}

impl TerminalFactory for RenderMode {
    fn create(&self, _id: u32, title: &str) -> Option<Arc<dyn Terminal>> {
        match self {
            RenderMode::Headless => None,
            RenderMode::Buffer => Some(Arc::new(BufferTerminal::new(title))),
        }
    }
}

/// Host-level message boxes, used when there is no terminal to draw on
pub trait Notifier: Send + Sync {
    /// Show a message to the user
    fn notify(&self, title: &str, message: &str);
}

/// Notifier that writes to stderr
#[derive(Debug, Default)]
pub struct StderrNotifier;

impl Notifier for StderrNotifier {
    fn notify(&self, title: &str, message: &str) {
        eprintln!("{}: {}", title, message);
    }
}

#[derive(Debug, Clone)]
struct Grid {
    width: u16,
    height: u16,
    chars: Vec<char>,
    colors: Vec<u8>,
    palette: [[u8; 3]; 16],
}

impl Grid {
    fn blank(width: u16, height: u16) -> Self {
        let cells = width as usize * height as usize;
        Self {
            width,
            height,
            chars: vec![' '; cells],
            colors: vec![DEFAULT_COLORS; cells],
            palette: DEFAULT_PALETTE,
        }
    }

    fn index(&self, x: u16, y: u16) -> Option<usize> {
        (x < self.width && y < self.height).then(|| y as usize * self.width as usize + x as usize)
    }

    fn write_line(&mut self, y: u16, text: &str) {
        for (x, ch) in text.chars().take(self.width as usize).enumerate() {
            if let Some(i) = self.index(x as u16, y) {
                self.chars[i] = ch;
            }
        }
    }

    fn row(&self, y: u16) -> String {
        let start = y as usize * self.width as usize;
        self.chars[start..start + self.width as usize]
            .iter()
            .collect::<String>()
            .trim_end()
            .to_string()
    }
}

/// Terminal that keeps its contents in memory
#[derive(Debug)]
pub struct BufferTerminal {
    title: String,
    grid: Mutex<Grid>,
    error_mode: AtomicBool,
    grayscale: AtomicBool,
    destroyed: AtomicBool,
    messages: Mutex<Vec<(String, String)>>,
    resets: Mutex<usize>,
}

impl BufferTerminal {
    /// Create a blank terminal of the default size
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            grid: Mutex::new(Grid::blank(DEFAULT_WIDTH, DEFAULT_HEIGHT)),
            error_mode: AtomicBool::new(false),
            grayscale: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            messages: Mutex::new(Vec::new()),
            resets: Mutex::new(0),
        }
    }

    /// Window title
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Character and colors at a cell
    pub fn cell(&self, x: u16, y: u16) -> Option<(char, u8)> {
        let grid = self.grid.lock();
        grid.index(x, y).map(|i| (grid.chars[i], grid.colors[i]))
    }

    /// One row of text with trailing blanks removed
    pub fn line(&self, y: u16) -> String {
        let grid = self.grid.lock();
        if y >= grid.height {
            return String::new();
        }
        grid.row(y)
    }

    /// Every non-blank row
    pub fn text(&self) -> Vec<String> {
        let grid = self.grid.lock();
        (0..grid.height)
            .map(|y| grid.row(y))
            .filter(|line| !line.is_empty())
            .collect()
    }

    /// Current palette entry
    pub fn palette(&self, index: u8) -> Option<[u8; 3]> {
        self.grid.lock().palette.get(index as usize).copied()
    }

    /// Messages shown with `show_message`
    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().clone()
    }

    /// How many times the terminal was reset
    pub fn reset_count(&self) -> usize {
        *self.resets.lock()
    }

    /// Has `destroy` been called?
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

impl Terminal for BufferTerminal {
    fn size(&self) -> (u16, u16) {
        let grid = self.grid.lock();
        (grid.width, grid.height)
    }

    fn resize(&self, width: u16, height: u16) {
        let mut grid = self.grid.lock();
        let palette = grid.palette;
        *grid = Grid::blank(width, height);
        grid.palette = palette;
    }

    fn write_cell(&self, x: u16, y: u16, ch: char, colors: u8) {
        let mut grid = self.grid.lock();
        if let Some(i) = grid.index(x, y) {
            grid.chars[i] = ch;
            grid.colors[i] = colors;
        }
    }

    fn set_palette(&self, index: u8, rgb: [u8; 3]) {
        if let Some(entry) = self.grid.lock().palette.get_mut(index as usize) {
            *entry = rgb;
        }
    }

    fn reset(&self) {
        let mut grid = self.grid.lock();
        let (width, height) = (grid.width, grid.height);
        *grid = Grid::blank(width, height);
        self.error_mode.store(false, Ordering::Release);
        *self.resets.lock() += 1;
    }

    fn show_fatal_message(&self, message: &str) {
        let mut grid = self.grid.lock();
        let (width, height) = (grid.width, grid.height);
        *grid = Grid::blank(width, height);
        grid.write_line(0, message);
        self.error_mode.store(true, Ordering::Release);
    }

    fn show_message(&self, title: &str, message: &str) {
        self.messages
            .lock()
            .push((title.to_string(), message.to_string()));
    }

    fn set_grayscale(&self, grayscale: bool) {
        self.grayscale.store(grayscale, Ordering::Release);
    }

    fn is_grayscale(&self) -> bool {
        self.grayscale.load(Ordering::Acquire)
    }

    fn is_error_mode(&self) -> bool {
        self.error_mode.load(Ordering::Acquire)
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
    }
}
