use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A document-annotation payload: source documents plus views of annotations
/// produced over them. Views reference annotations across views by long id
/// (`view_id:annotation_id`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Payload {
    pub documents: Vec<Document>,
    pub views: Vec<View>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: DocumentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Video,
    Text,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct View {
    pub id: String,
    #[serde(default)]
    pub metadata: ViewMetadata,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ViewMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// All annotation kinds carried by views. `start`, `end`, `timePoint` and
/// `representatives` are in frame units.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Annotation {
    TimeFrame {
        id: String,
        start: u64,
        end: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        representatives: Vec<u64>,
    },
    TimePoint {
        id: String,
        #[serde(rename = "timePoint")]
        time_point: u64,
    },
    TextDocument {
        id: String,
        text: String,
    },
    Alignment {
        id: String,
        source: String,
        target: String,
    },
}

impl Annotation {
    pub fn id(&self) -> &str {
        match self {
            Annotation::TimeFrame { id, .. }
            | Annotation::TimePoint { id, .. }
            | Annotation::TextDocument { id, .. }
            | Annotation::Alignment { id, .. } => id,
        }
    }
}

impl View {
    /// Next free annotation id within this view.
    pub fn next_id(&self) -> String {
        format!("a_{}", self.annotations.len() + 1)
    }

    pub fn long_id(&self, annotation_id: &str) -> String {
        format!("{}:{}", self.id, annotation_id)
    }

    pub fn contains_timeframes(&self) -> bool {
        self.annotations
            .iter()
            .any(|a| matches!(a, Annotation::TimeFrame { .. }))
    }
}

impl Payload {
    pub fn video_document(&self) -> Option<&Document> {
        self.documents.iter().find(|d| d.kind == DocumentKind::Video)
    }

    /// The most recent view carrying TimeFrame annotations, if any. These
    /// frames are the spans to caption; their absence selects interval
    /// sampling instead.
    pub fn timeframe_view(&self) -> Option<&View> {
        self.views.iter().rev().find(|v| v.contains_timeframes())
    }

    /// Append a fresh output view signed with the producing app and the
    /// request parameters, returning its index.
    pub fn new_view(&mut self, app: &str, parameters: serde_json::Value) -> usize {
        let mut n = self.views.len() + 1;
        while self.views.iter().any(|v| v.id == format!("v_{n}")) {
            n += 1;
        }
        self.views.push(View {
            id: format!("v_{n}"),
            metadata: ViewMetadata {
                app: Some(app.to_owned()),
                parameters: Some(parameters),
            },
            annotations: Vec::new(),
        });
        self.views.len() - 1
    }

    /// Collect the text aligned to TimeFrames overlapping `[start, end]`,
    /// ordered by the frames' start positions. Annotations are keyed by long
    /// id; a bare reference resolves against the alignment's own view.
    pub fn slice_text(&self, start: u64, end: u64) -> String {
        fn qualify(reference: &str, view: &View) -> String {
            if reference.contains(':') {
                reference.to_owned()
            } else {
                view.long_id(reference)
            }
        }

        let mut frames: HashMap<String, (u64, u64)> = HashMap::new();
        let mut texts: HashMap<String, &str> = HashMap::new();
        for view in &self.views {
            for annotation in &view.annotations {
                match annotation {
                    Annotation::TimeFrame {
                        id,
                        start: s,
                        end: e,
                        ..
                    } => {
                        frames.insert(view.long_id(id), (*s, *e));
                    }
                    Annotation::TextDocument { id, text } => {
                        texts.insert(view.long_id(id), text);
                    }
                    _ => {}
                }
            }
        }

        let mut pieces: Vec<(u64, &str)> = Vec::new();
        for view in &self.views {
            for annotation in &view.annotations {
                if let Annotation::Alignment { source, target, .. } = annotation {
                    let Some(&(s, e)) = frames.get(&qualify(source, view)) else {
                        continue;
                    };
                    if s <= end && e >= start {
                        if let Some(&text) = texts.get(&qualify(target, view)) {
                            pieces.push((s, text));
                        }
                    }
                }
            }
        }
        pieces.sort_by_key(|&(s, _)| s);
        pieces
            .into_iter()
            .map(|(_, t)| t)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transcript_payload() -> Payload {
        Payload {
            documents: vec![Document {
                id: "d_1".into(),
                kind: DocumentKind::Video,
                location: Some("/data/news.mp4".into()),
            }],
            views: vec![View {
                id: "v_1".into(),
                metadata: ViewMetadata::default(),
                annotations: vec![
                    Annotation::TimeFrame {
                        id: "tf_1".into(),
                        start: 0,
                        end: 100,
                        label: None,
                        representatives: vec![],
                    },
                    Annotation::TimeFrame {
                        id: "tf_2".into(),
                        start: 100,
                        end: 200,
                        label: None,
                        representatives: vec![],
                    },
                    Annotation::TextDocument {
                        id: "td_1".into(),
                        text: "hello".into(),
                    },
                    Annotation::TextDocument {
                        id: "td_2".into(),
                        text: "world".into(),
                    },
                    Annotation::Alignment {
                        id: "al_2".into(),
                        source: "v_1:tf_2".into(),
                        target: "v_1:td_2".into(),
                    },
                    Annotation::Alignment {
                        id: "al_1".into(),
                        source: "v_1:tf_1".into(),
                        target: "v_1:td_1".into(),
                    },
                ],
            }],
        }
    }

    #[test]
    fn parses_payload_json() {
        let payload: Payload = serde_json::from_value(json!({
            "documents": [{"id": "d_1", "type": "video", "location": "/data/a.mp4"}],
            "views": [{"id": "v_1", "annotations": [
                {"type": "TimeFrame", "id": "tf_1", "start": 0, "end": 100, "label": "slate"},
                {"type": "TimePoint", "id": "tp_1", "timePoint": 30}
            ]}]
        }))
        .unwrap();

        assert_eq!(payload.video_document().unwrap().id, "d_1");
        let view = payload.timeframe_view().unwrap();
        assert_eq!(view.id, "v_1");
        match &view.annotations[1] {
            Annotation::TimePoint { time_point, .. } => assert_eq!(*time_point, 30),
            other => panic!("unexpected annotation: {other:?}"),
        }
    }

    #[test]
    fn slice_text_orders_by_frame_start() {
        let payload = transcript_payload();
        assert_eq!(payload.slice_text(50, 150), "hello world");
        assert_eq!(payload.slice_text(0, 10), "hello");
        assert_eq!(payload.slice_text(150, 300), "world");
        assert_eq!(payload.slice_text(300, 400), "");
    }

    #[test]
    fn slice_text_keeps_short_ids_apart_across_views() {
        let segment = |view_id: &str, start: u64, end: u64, text: &str| View {
            id: view_id.into(),
            metadata: ViewMetadata::default(),
            annotations: vec![
                Annotation::TimeFrame {
                    id: "tf_1".into(),
                    start,
                    end,
                    label: None,
                    representatives: vec![],
                },
                Annotation::TextDocument {
                    id: "td_1".into(),
                    text: text.into(),
                },
                Annotation::Alignment {
                    id: "al_1".into(),
                    source: "tf_1".into(),
                    target: "td_1".into(),
                },
            ],
        };
        let payload = Payload {
            documents: vec![],
            views: vec![
                segment("v_1", 0, 100, "first"),
                segment("v_2", 500, 600, "second"),
            ],
        };

        // Bare references resolve within their own view, so identical short
        // ids in separate views never collide.
        assert_eq!(payload.slice_text(0, 100), "first");
        assert_eq!(payload.slice_text(500, 600), "second");
        assert_eq!(payload.slice_text(0, 600), "first second");
    }

    #[test]
    fn new_view_ids_do_not_collide() {
        let mut payload = transcript_payload();
        let idx = payload.new_view("captionai", json!({}));
        assert_eq!(payload.views[idx].id, "v_2");
        let idx = payload.new_view("captionai", json!({}));
        assert_eq!(payload.views[idx].id, "v_3");
    }
}
