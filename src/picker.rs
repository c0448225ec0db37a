//! Point picking at the boundary between the geometry core and a UI.
//!
//! The UI collaborator sends [`PickEvent`]s over a channel; [`pick_points`]
//! collects them into a [`PickSession`] owned by the call. Nothing survives
//! the call, and the wait can be bounded by a timeout or ended by a
//! `Cancel` event.

use std::io::BufRead;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use crate::error::{RectifyError, Result};
use crate::geometry::Point2D;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PickEvent {
    Click(Point2D),
    Cancel,
}

/// Click buffer for one picking interaction
#[derive(Debug)]
pub struct PickSession {
    required: usize,
    points: Vec<Point2D>,
}

impl PickSession {
    pub fn new(required: usize) -> Self {
        Self {
            required,
            points: Vec::with_capacity(required),
        }
    }

    /// Record a click; returns true once enough points are collected
    ///
    /// Clicks arriving after completion are ignored.
    pub fn on_click(&mut self, point: Point2D) -> bool {
        if !self.is_done() {
            self.points.push(point);
            debug!(
                "Picked point {}/{}: ({:.1}, {:.1})",
                self.points.len(),
                self.required,
                point.x,
                point.y
            );
        }
        self.is_done()
    }

    pub fn is_done(&self) -> bool {
        self.points.len() >= self.required
    }

    pub fn picked(&self) -> usize {
        self.points.len()
    }

    pub fn into_points(self) -> Vec<Point2D> {
        self.points
    }

    fn cancelled(&self) -> RectifyError {
        RectifyError::PickCancelled {
            picked: self.points.len(),
            required: self.required,
        }
    }
}

/// Block until `required` clicks arrive, in click order
///
/// Fails with `PickCancelled` on a `Cancel` event, when every sender is
/// dropped, or when `timeout` elapses first.
pub fn pick_points(
    events: &Receiver<PickEvent>,
    required: usize,
    timeout: Option<Duration>,
) -> Result<Vec<Point2D>> {
    let mut session = PickSession::new(required);
    let deadline = timeout.map(|t| Instant::now() + t);

    while !session.is_done() {
        let event = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match events.recv_timeout(remaining) {
                    Ok(event) => event,
                    Err(RecvTimeoutError::Timeout) => {
                        warn!("Point picking timed out");
                        return Err(session.cancelled());
                    }
                    Err(RecvTimeoutError::Disconnected) => return Err(session.cancelled()),
                }
            }
            None => match events.recv() {
                Ok(event) => event,
                Err(_) => return Err(session.cancelled()),
            },
        };

        match event {
            PickEvent::Click(point) => {
                session.on_click(point);
            }
            PickEvent::Cancel => return Err(session.cancelled()),
        }
    }

    Ok(session.into_points())
}

/// Parse "x y" or "x,y"
pub fn parse_point(s: &str) -> std::result::Result<Point2D, String> {
    let parts: Vec<&str> = s
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() != 2 {
        return Err(format!("Invalid point '{}', expected 'x y'", s));
    }

    let x: f64 = parts[0]
        .parse()
        .map_err(|_| format!("Invalid x value: {}", parts[0]))?;
    let y: f64 = parts[1]
        .parse()
        .map_err(|_| format!("Invalid y value: {}", parts[1]))?;

    Ok(Point2D::new(x, y))
}

/// Terminal stand-in for a click UI: one point per line, "q" or EOF cancels
pub fn spawn_line_reader<R>(reader: R, events: Sender<PickEvent>) -> JoinHandle<()>
where
    R: BufRead + Send + 'static,
{
    thread::spawn(move || {
        for line in reader.lines() {
            let Ok(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let event = if line.eq_ignore_ascii_case("q") {
                PickEvent::Cancel
            } else {
                match parse_point(line) {
                    Ok(point) => PickEvent::Click(point),
                    Err(e) => {
                        warn!("{}", e);
                        continue;
                    }
                }
            };
            if events.send(event).is_err() {
                return;
            }
        }
        let _ = events.send(PickEvent::Cancel);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::io::Cursor;

    #[test]
    fn test_session_ignores_extra_clicks() {
        let mut session = PickSession::new(2);
        assert!(!session.on_click(Point2D::new(1.0, 2.0)));
        assert!(session.on_click(Point2D::new(3.0, 4.0)));
        assert!(session.on_click(Point2D::new(5.0, 6.0)));
        assert_eq!(
            session.into_points(),
            vec![Point2D::new(1.0, 2.0), Point2D::new(3.0, 4.0)]
        );
    }

    #[test]
    fn test_pick_points_in_click_order() {
        let (tx, rx) = unbounded();
        for i in 0..5 {
            tx.send(PickEvent::Click(Point2D::new(i as f64, 0.0))).unwrap();
        }
        let points = pick_points(&rx, 4, None).unwrap();
        assert_eq!(points.len(), 4);
        assert_eq!(points[0].x, 0.0);
        assert_eq!(points[3].x, 3.0);
    }

    #[test]
    fn test_cancel_event_stops_picking() {
        let (tx, rx) = unbounded();
        tx.send(PickEvent::Click(Point2D::new(1.0, 1.0))).unwrap();
        tx.send(PickEvent::Cancel).unwrap();
        let err = pick_points(&rx, 4, None).unwrap_err();
        assert!(matches!(
            err,
            RectifyError::PickCancelled {
                picked: 1,
                required: 4
            }
        ));
    }

    #[test]
    fn test_timeout_stops_picking() {
        let (_tx, rx) = unbounded::<PickEvent>();
        let err = pick_points(&rx, 2, Some(Duration::from_millis(20))).unwrap_err();
        assert!(matches!(err, RectifyError::PickCancelled { picked: 0, .. }));
    }

    #[test]
    fn test_disconnect_stops_picking() {
        let (tx, rx) = unbounded::<PickEvent>();
        drop(tx);
        assert!(pick_points(&rx, 1, None).is_err());
    }

    #[test]
    fn test_parse_point() {
        assert_eq!(parse_point("12 34.5").unwrap(), Point2D::new(12.0, 34.5));
        assert_eq!(parse_point("7,8").unwrap(), Point2D::new(7.0, 8.0));
        assert!(parse_point("7").is_err());
        assert!(parse_point("a b").is_err());
    }

    #[test]
    fn test_line_reader_feeds_clicks() {
        let (tx, rx) = unbounded();
        let input = Cursor::new("100 100\nnonsense\n\n500,100\n500 700\n100 700\n");
        let handle = spawn_line_reader(input, tx);

        let points = pick_points(&rx, 4, Some(Duration::from_secs(5))).unwrap();
        handle.join().unwrap();

        assert_eq!(points[1], Point2D::new(500.0, 100.0));
        assert_eq!(points[3], Point2D::new(100.0, 700.0));
    }

    #[test]
    fn test_line_reader_eof_cancels() {
        let (tx, rx) = unbounded();
        let handle = spawn_line_reader(Cursor::new("1 1\n"), tx);
        assert!(pick_points(&rx, 2, Some(Duration::from_secs(5))).is_err());
        handle.join().unwrap();
    }
}
