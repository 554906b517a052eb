//! Integration tests for the text binding.
//!
//! Each test wires two peers, each with its own shared document,
//! buffer and editor, and relays CRDT updates and presence payloads
//! between them by hand.

use std::cell::Cell;
use std::rc::Rc;

use logos_textsync::{
    Awareness, CodeEditor, ContentWidget, CursorRegistries, CursorRegistryLookup, MemoryEditor,
    MemoryModel, Position, SharedDocument, TextBinding, TextEdit, TextModel, UserInfo, WireSelection,
};

const URI: &str = "file:///src/main.rs";

struct Peer {
    doc: SharedDocument,
    awareness: Rc<Awareness>,
    registries: Rc<CursorRegistries>,
    model: Rc<MemoryModel>,
    editor: Rc<MemoryEditor>,
    binding: TextBinding,
}

impl Peer {
    fn new(client_id: u64, doc: SharedDocument) -> Self {
        let awareness = Rc::new(Awareness::new(client_id));
        awareness.set_local_user(UserInfo::new(
            format!("user-{client_id}"),
            format!("user{client_id}"),
        ));
        let registries = Rc::new(CursorRegistries::new());
        let model = MemoryModel::new("");
        let editor = MemoryEditor::new(model.clone());
        let dyn_editor: Rc<dyn CodeEditor> = editor.clone();
        registries.ensure(&dyn_editor, &awareness);

        let lookup: Rc<dyn CursorRegistryLookup> = registries.clone();
        let binding = TextBinding::new(
            URI,
            doc.clone(),
            model.clone(),
            &[dyn_editor],
            awareness.clone(),
            lookup,
        )
        .unwrap();

        Self {
            doc,
            awareness,
            registries,
            model,
            editor,
            binding,
        }
    }

    fn edit(&self, edits: &[TextEdit]) {
        self.model.apply_edits(edits).unwrap();
    }

    fn text(&self) -> String {
        self.model.text()
    }
}

fn sync(from: &SharedDocument, to: &SharedDocument) {
    let update = from.encode_diff(&to.state_vector()).unwrap();
    to.apply_update(&update).unwrap();
}

fn sync_presence(from: &Peer, to: &Peer) {
    let payload = from.awareness.encode_local_update().unwrap();
    to.awareness.apply_update(&payload).unwrap();
}

/// Two peers bound to the same text, starting from `content`.
fn pair(content: &str) -> (Peer, Peer) {
    let doc1 = SharedDocument::new();
    doc1.insert_text(URI, content).unwrap();
    let doc2 = SharedDocument::new();
    sync(&doc1, &doc2);
    (Peer::new(1, doc1), Peer::new(2, doc2))
}

#[test]
fn test_binding_adopts_shared_content() {
    let (a, b) = pair("fn main() {}\n");
    assert_eq!(a.text(), "fn main() {}\n");
    assert_eq!(b.text(), "fn main() {}\n");
    assert_eq!(a.binding.resource(), URI);
}

#[test]
fn test_local_edits_reach_remote_buffer() {
    let (a, b) = pair("hello");
    a.edit(&[TextEdit::insert(5, " world")]);
    assert_eq!(a.doc.text_content(URI).as_deref(), Some("hello world"));

    sync(&a.doc, &b.doc);
    assert_eq!(b.text(), "hello world");

    b.edit(&[TextEdit::delete(0, 6)]);
    sync(&b.doc, &a.doc);
    assert_eq!(a.text(), "world");
}

#[test]
fn test_concurrent_edits_converge() {
    let (a, b) = pair("abc");
    a.edit(&[TextEdit::insert(0, "1")]);
    b.edit(&[TextEdit::insert(3, "2")]);
    b.edit(&[TextEdit::delete(1, 1)]);

    sync(&a.doc, &b.doc);
    sync(&b.doc, &a.doc);

    assert_eq!(a.text(), b.text());
    assert_eq!(a.doc.text_content(URI), b.doc.text_content(URI));
    assert_eq!(a.doc.text_content(URI).unwrap(), a.text());
}

#[test]
fn test_no_feedback_between_sides() {
    let (a, b) = pair("abc");

    let model_changes = Rc::new(Cell::new(0));
    let counter = model_changes.clone();
    let _model_sub = b.model.on_did_change_content(Box::new(move |_| {
        counter.set(counter.get() + 1);
        Ok(())
    }));
    let text_changes = Rc::new(Cell::new(0));
    let counter = text_changes.clone();
    let _text_sub = b.doc.on_text_changed(move |_| {
        counter.set(counter.get() + 1);
        Ok(())
    });

    // Local edit: one buffer change, one CRDT change, nothing echoed back.
    b.edit(&[TextEdit::insert(3, "d")]);
    assert_eq!(model_changes.get(), 1);
    assert_eq!(text_changes.get(), 1);
    assert_eq!(b.text(), "abcd");

    // Remote edit: one CRDT change and one buffer change.
    a.edit(&[TextEdit::insert(0, "x")]);
    sync(&a.doc, &b.doc);
    assert_eq!(text_changes.get(), 2);
    assert_eq!(model_changes.get(), 2);
    assert_eq!(b.text(), "xabcd");
    assert!(!b.binding.guard().is_busy());
}

#[test]
fn test_batch_applied_right_to_left() {
    let (a, b) = pair("hello world");
    a.edit(&[TextEdit::insert(1, "A"), TextEdit::insert(5, "B")]);
    assert_eq!(a.text(), "hAelloB world");
    assert_eq!(a.doc.text_content(URI).as_deref(), Some("hAelloB world"));

    sync(&a.doc, &b.doc);
    assert_eq!(b.text(), "hAelloB world");

    // Batch order does not matter.
    let (c, _d) = pair("hello world");
    c.edit(&[TextEdit::insert(5, "B"), TextEdit::insert(1, "A")]);
    assert_eq!(c.doc.text_content(URI).as_deref(), Some("hAelloB world"));
}

#[test]
fn test_replacement_edit() {
    let (a, b) = pair("let x = 1;");
    a.edit(&[TextEdit::new(4, 1, "value")]);
    sync(&a.doc, &b.doc);
    assert_eq!(b.text(), "let value = 1;");
}

#[test]
fn test_selection_stays_between_same_characters() {
    let (a, b) = pair("abc");
    b.editor.select_offsets(1, 1);

    a.edit(&[TextEdit::insert(0, "X")]);
    sync(&a.doc, &b.doc);

    assert_eq!(b.text(), "Xabc");
    assert_eq!(b.editor.selection_offsets(), Some((2, 2)));
}

#[test]
fn test_range_selection_survives_remote_delete() {
    let (a, b) = pair("0123456789");
    b.editor.select_offsets(4, 7);

    a.edit(&[TextEdit::delete(0, 2)]);
    sync(&a.doc, &b.doc);

    assert_eq!(b.text(), "23456789");
    assert_eq!(b.editor.selection_offsets(), Some((2, 5)));
}

#[test]
fn test_undo_only_reverts_own_changes() {
    let (a, b) = pair("");
    a.edit(&[TextEdit::insert(0, "114514")]);
    sync(&a.doc, &b.doc);

    b.edit(&[TextEdit::insert(3, "1919810")]);
    sync(&b.doc, &a.doc);
    assert_eq!(a.text(), "1141919810514");

    assert!(a.binding.undo().unwrap());
    assert_eq!(a.text(), "1919810");
    assert_eq!(a.doc.text_content(URI).as_deref(), Some("1919810"));

    assert!(a.binding.redo().unwrap());
    assert_eq!(a.text(), "1141919810514");

    sync(&a.doc, &b.doc);
    assert_eq!(b.text(), "1141919810514");
}

#[test]
fn test_undo_with_empty_history() {
    let (a, _b) = pair("abc");
    assert!(!a.binding.undo().unwrap());
}

#[test]
fn test_remote_selection_rendered() {
    let (a, b) = pair("hello world");
    b.editor.select_offsets(1, 3);
    sync_presence(&b, &a);

    let decorations = a.editor.decorations();
    assert_eq!(decorations.len(), 1);
    let decoration = &decorations[0];
    assert_eq!(decoration.class_name, "remote-selection remote-selection-2");
    assert_eq!(decoration.range.start, Position::new(0, 1));
    assert_eq!(decoration.range.end, Position::new(0, 3));
    assert_eq!(
        decoration.after_content_class.as_deref(),
        Some("remote-selection-head remote-selection-head-2")
    );
    assert_eq!(decoration.before_content_class, None);

    let widget = a.editor.widget("remote-cursor-2").unwrap();
    assert_eq!(widget.label(), "user2");
    assert_eq!(widget.position(), Some(Position::new(0, 3)));
}

#[test]
fn test_backward_selection_marks_start() {
    let (a, b) = pair("hello world");
    b.editor.select_offsets(7, 2);
    sync_presence(&b, &a);

    let decorations = a.editor.decorations();
    assert_eq!(decorations.len(), 1);
    assert_eq!(decorations[0].range.start, Position::new(0, 2));
    assert_eq!(decorations[0].range.end, Position::new(0, 7));
    assert!(decorations[0].before_content_class.is_some());
    assert!(decorations[0].after_content_class.is_none());

    let registry = a.registries.registry_for(a.editor.id()).unwrap();
    assert_eq!(
        registry.widget(2).unwrap().position(),
        Some(Position::new(0, 2))
    );
}

#[test]
fn test_remote_selection_follows_text() {
    let (a, b) = pair("abcdef");
    b.editor.select_offsets(2, 4);
    sync_presence(&b, &a);

    b.edit(&[TextEdit::insert(0, ">>")]);
    sync(&b.doc, &a.doc);

    let decorations = a.editor.decorations();
    assert_eq!(decorations[0].range.start, Position::new(0, 4));
    assert_eq!(decorations[0].range.end, Position::new(0, 6));
}

#[test]
fn test_local_client_never_decorated() {
    let (a, _b) = pair("abc");
    a.editor.select_offsets(0, 2);
    assert!(a.editor.decorations().is_empty());
    assert!(a.editor.widget_ids().is_empty());
    assert!(a.awareness.local_state().unwrap().selection.is_some());
}

#[test]
fn test_selection_for_other_resource_ignored() {
    let (a, b) = pair("abc");
    b.doc.insert_text("file:///other.rs", "zzz").unwrap();
    let other = b.doc.relative_position("file:///other.rs", 1).unwrap();
    b.awareness
        .set_local_selection(Some(WireSelection {
            anchor: other.to_wire(),
            head: other.to_wire(),
        }));
    sync(&b.doc, &a.doc);
    sync_presence(&b, &a);

    assert!(a.editor.decorations().is_empty());
}

#[test]
fn test_remote_departure_clears_decorations() {
    let (a, b) = pair("abc");
    b.editor.select_offsets(0, 1);
    sync_presence(&b, &a);
    assert_eq!(a.editor.decorations().len(), 1);

    a.awareness
        .apply_update(&b.awareness.encode_departure().unwrap())
        .unwrap();
    assert!(a.editor.decorations().is_empty());
    assert!(a.editor.widget_ids().is_empty());
}

#[test]
fn test_editor_showing_other_model_skipped() {
    let (a, b) = pair("abc");
    let other = MemoryModel::new("unrelated");
    a.editor.set_model(Some(other));

    b.editor.select_offsets(0, 2);
    sync_presence(&b, &a);
    assert!(a.editor.decorations().is_empty());

    // Remote edits still reach the bound buffer.
    b.edit(&[TextEdit::insert(3, "d")]);
    sync(&b.doc, &a.doc);
    assert_eq!(a.text(), "abcd");
}

#[test]
fn test_switching_buffers_clears_stale_decorations() {
    let (a, b) = pair("hello world");
    b.editor.select_offsets(1, 3);
    sync_presence(&b, &a);
    assert_eq!(a.editor.decorations().len(), 1);

    a.editor.set_model(Some(MemoryModel::new("unrelated")));
    b.editor.select_offsets(2, 4);
    sync_presence(&b, &a);

    assert!(a.editor.decorations().is_empty());
    let registry = a.registries.registry_for(a.editor.id()).unwrap();
    assert_eq!(registry.widget(2).unwrap().position(), None);

    // Coming back renders the current selection again.
    a.editor.set_model(Some(a.model.clone()));
    a.binding.render_decorations();
    let decorations = a.editor.decorations();
    assert_eq!(decorations.len(), 1);
    assert_eq!(decorations[0].range.start, Position::new(0, 2));
}

#[test]
fn test_multibyte_selection_stays_put() {
    let (a, b) = pair("日本語");
    b.editor.select_offsets(3, 9);
    assert!(b.awareness.local_state().unwrap().selection.is_some());

    a.edit(&[TextEdit::insert(0, "X")]);
    sync(&a.doc, &b.doc);

    assert_eq!(b.text(), "X日本語");
    assert_eq!(b.editor.selection_offsets(), Some((4, 10)));
}

#[test]
fn test_multibyte_caret_at_end_published() {
    let (a, b) = pair("日本語");
    b.editor.select_offsets(9, 9);
    sync_presence(&b, &a);

    let registry = a.registries.registry_for(a.editor.id()).unwrap();
    assert_eq!(
        registry.widget(2).unwrap().position(),
        Some(Position::new(0, 3))
    );
}

#[test]
fn test_multibyte_remote_selection_rendered() {
    let (a, b) = pair("日本語テキスト");
    b.editor.select_offsets(3, 9);
    sync_presence(&b, &a);

    let decorations = a.editor.decorations();
    assert_eq!(decorations.len(), 1);
    assert_eq!(decorations[0].range.start, Position::new(0, 1));
    assert_eq!(decorations[0].range.end, Position::new(0, 3));
}

#[test]
fn test_multibyte_edits_converge() {
    let (a, b) = pair("héllo wörld");
    a.edit(&[TextEdit::insert(6, "😀")]);
    b.edit(&[TextEdit::delete(8, 2)]);
    b.edit(&[TextEdit::insert(11, "!")]);

    sync(&a.doc, &b.doc);
    sync(&b.doc, &a.doc);

    assert_eq!(a.text(), "héllo😀 wrld!");
    assert_eq!(b.text(), "héllo😀 wrld!");
    assert_eq!(a.doc.text_content(URI), b.doc.text_content(URI));

    a.edit(&[TextEdit::insert(0, "«"), TextEdit::insert(a.text().len(), "»")]);
    sync(&a.doc, &b.doc);
    assert_eq!(b.text(), "«héllo😀 wrld!»");
}

#[test]
fn test_paused_presence_resumes() {
    let (a, b) = pair("abc");
    a.binding.pause_presence();
    assert!(a.binding.is_presence_paused());

    a.editor.select_offsets(0, 2);
    assert!(a.awareness.local_state().unwrap().selection.is_none());

    b.editor.select_offsets(1, 2);
    sync_presence(&b, &a);
    assert!(a.editor.decorations().is_empty());

    // Text keeps flowing while presence is paused.
    b.edit(&[TextEdit::insert(3, "d")]);
    sync(&b.doc, &a.doc);
    assert_eq!(a.text(), "abcd");

    a.binding.resume_presence();
    assert!(!a.binding.is_presence_paused());
    assert_eq!(a.editor.decorations().len(), 1);

    a.editor.select_offsets(1, 1);
    assert!(a.awareness.local_state().unwrap().selection.is_some());
}

#[test]
fn test_second_editor_on_same_binding() {
    let (a, b) = pair("abc");
    let second = MemoryEditor::new(a.model.clone());
    a.binding.add_editor(second.clone());
    assert_eq!(a.binding.editor_ids().len(), 2);

    b.editor.select_offsets(1, 2);
    sync_presence(&b, &a);
    assert_eq!(second.decorations().len(), 1);
    assert_eq!(a.editor.decorations().len(), 1);

    assert!(a.binding.remove_editor(second.id()));
    assert!(second.decorations().is_empty());
    assert_eq!(a.binding.editor_ids(), vec![a.editor.id()]);
}

#[test]
fn test_dispose_stops_sync() {
    let (a, b) = pair("abc");
    b.editor.select_offsets(0, 1);
    sync_presence(&b, &a);

    a.binding.dispose();
    assert!(a.binding.is_disposed());
    assert!(a.editor.decorations().is_empty());

    a.edit(&[TextEdit::insert(0, "local")]);
    assert_eq!(a.doc.text_content(URI).as_deref(), Some("abc"));

    b.edit(&[TextEdit::insert(0, "remote")]);
    sync(&b.doc, &a.doc);
    assert_eq!(a.text(), "localabc");
    assert!(a.binding.undo().is_err());
}

#[test]
fn test_rebinding_realigns_buffer() {
    let doc = SharedDocument::new();
    doc.insert_text(URI, "abc").unwrap();
    let peer = Peer::new(1, doc);

    // Buffer and text diverge once the binding is gone.
    peer.binding.dispose();
    peer.edit(&[TextEdit::insert(3, "defgh")]);
    let lookup: Rc<dyn CursorRegistryLookup> = peer.registries.clone();
    let rebound = TextBinding::new(
        URI,
        peer.doc.clone(),
        peer.model.clone(),
        &[],
        peer.awareness.clone(),
        lookup,
    )
    .unwrap();
    assert_eq!(peer.text(), "abc");
    assert!(!rebound.is_disposed());
}
