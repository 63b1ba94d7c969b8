//! Groups state-setting events with the paint event they affect.

use tracing::trace;

use crate::protocol::{ServerEvent, StateCategory};

/// A paint event plus every prerequisite emitted since the previous paint
/// event, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub struct StateAndPaint {
    pub prerequisites: Vec<ServerEvent>,
    pub paint: ServerEvent,
}

impl StateAndPaint {
    /// Prerequisites with each run of consecutive same-category writes
    /// reduced to its last write. Relative order of the survivors is kept.
    pub fn collapsed(&self) -> impl Iterator<Item = &ServerEvent> + '_ {
        self.prerequisites
            .iter()
            .enumerate()
            .filter(move |(idx, event)| {
                let next = self.prerequisites.get(idx + 1);
                !same_category(event, next)
            })
            .map(|(_, event)| event)
    }
}

fn same_category(event: &ServerEvent, next: Option<&ServerEvent>) -> bool {
    let Some(next) = next else {
        return false;
    };
    let here: Option<StateCategory> = event.category();
    here.is_some() && here == next.category()
}

/// Splits an ordered event stream into one bundle per paint event.
///
/// Prerequisites after the last paint event have nothing to affect and are
/// dropped.
pub fn shrink_by_paint_events(events: Vec<ServerEvent>) -> Vec<StateAndPaint> {
    let mut bundles = Vec::with_capacity(events.iter().filter(|e| e.is_paint()).count());
    let mut pending: Vec<ServerEvent> = Vec::new();
    for event in events {
        if event.is_paint() {
            bundles.push(StateAndPaint {
                prerequisites: std::mem::take(&mut pending),
                paint: event,
            });
        } else {
            pending.push(event);
        }
    }
    if !pending.is_empty() {
        trace!(
            target = "replay::optimizer",
            dropped = pending.len(),
            "dropping trailing prerequisites"
        );
    }
    bundles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Argb, CompositeRule, FontSpec, PaintValue, Rect};

    fn paint(argb: u32) -> ServerEvent {
        ServerEvent::SetPaint {
            paint: PaintValue::Color { argb: Argb(argb) },
        }
    }

    fn font(size: u16) -> ServerEvent {
        ServerEvent::SetFont {
            font: FontSpec { font_id: 1, size },
        }
    }

    fn line() -> ServerEvent {
        ServerEvent::DrawLine {
            x1: 0,
            y1: 0,
            x2: 10,
            y2: 10,
        }
    }

    fn string() -> ServerEvent {
        ServerEvent::DrawString {
            text: "abc".into(),
            x: 1,
            y: 12,
            desired_width: 21.0,
        }
    }

    #[test_timeout::timeout]
    fn paint_only_stream_has_empty_prerequisites() {
        let bundles = shrink_by_paint_events(vec![line(), string()]);
        assert_eq!(bundles.len(), 2);
        assert!(bundles.iter().all(|b| b.prerequisites.is_empty()));
        assert_eq!(bundles[0].paint, line());
        assert_eq!(bundles[1].paint, string());
    }

    #[test_timeout::timeout]
    fn prerequisites_attach_to_the_following_paint() {
        let composite = ServerEvent::SetComposite {
            rule: CompositeRule::SrcOver,
            alpha: 0.5,
        };
        let bundles = shrink_by_paint_events(vec![
            paint(0xFF00_0000),
            font(14),
            string(),
            paint(0xFFFF_FFFF),
            composite.clone(),
            line(),
        ]);
        assert_eq!(
            bundles,
            vec![
                StateAndPaint {
                    prerequisites: vec![paint(0xFF00_0000), font(14)],
                    paint: string(),
                },
                StateAndPaint {
                    prerequisites: vec![paint(0xFFFF_FFFF), composite],
                    paint: line(),
                },
            ]
        );
    }

    #[test_timeout::timeout]
    fn trailing_prerequisites_are_dropped() {
        let bundles = shrink_by_paint_events(vec![line(), paint(1), font(9)]);
        assert_eq!(bundles.len(), 1);
        assert!(shrink_by_paint_events(vec![paint(1)]).is_empty());
        assert!(shrink_by_paint_events(Vec::new()).is_empty());
    }

    #[test_timeout::timeout]
    fn collapsing_keeps_last_write_per_run() {
        let bundle = StateAndPaint {
            prerequisites: vec![
                paint(1),
                paint(2),
                font(10),
                paint(3),
                ServerEvent::SetClip {
                    clip: Some(Rect::new(0, 0, 5, 5)),
                },
                ServerEvent::SetClip { clip: None },
            ],
            paint: line(),
        };
        let collapsed: Vec<_> = bundle.collapsed().cloned().collect();
        assert_eq!(
            collapsed,
            vec![
                paint(2),
                font(10),
                paint(3),
                ServerEvent::SetClip { clip: None }
            ]
        );
    }
}
