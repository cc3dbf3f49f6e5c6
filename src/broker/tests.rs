use super::Broker;
use super::topic::TopicTree;
use crate::client::Client;
use crate::persistence::LogRecord;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tungstenite::protocol::Message as WsMessage;

fn record(topic: &str, payload: &str) -> LogRecord {
    LogRecord {
        id: 0,
        topic: topic.to_string(),
        payload: payload.to_string(),
        timestamp: 0,
    }
}

fn connect(broker: &mut Broker, topic: &str) -> (String, UnboundedReceiver<WsMessage>) {
    let (tx, rx) = mpsc::unbounded_channel::<WsMessage>();
    let client = Client::new(topic, tx);
    let id = client.id.clone();
    broker.attach(client);
    (id, rx)
}

fn received(rx: &mut UnboundedReceiver<WsMessage>) -> Vec<String> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg.to_text().unwrap().to_string());
    }
    out
}

fn sorted(mut ids: Vec<String>) -> Vec<String> {
    ids.sort();
    ids
}

#[test]
fn test_tree_new_has_only_root() {
    let tree = TopicTree::new();
    assert_eq!(tree.node_count(), 1);
    assert_eq!(tree.subscriber_count(), 0);
    assert!(tree.node(tree.root()).unwrap().children.is_empty());
}

#[test]
fn test_resolve_creates_intermediate_nodes() {
    let mut tree = TopicTree::new();
    let leaf = tree.resolve("a/b/c");
    assert_eq!(tree.node_count(), 4);
    assert_eq!(tree.node(leaf).unwrap().name, "c");
    assert_eq!(tree.resolve("a/b/c"), leaf);
    assert_eq!(tree.node_count(), 4);
}

#[test]
fn test_resolve_ignores_empty_segments() {
    let mut tree = TopicTree::new();
    let leaf = tree.resolve("/a//b/");
    assert_eq!(tree.resolve("a/b"), leaf);
    assert_eq!(tree.resolve(""), tree.root());
    assert_eq!(tree.resolve("///"), tree.root());
}

#[test]
fn test_lookup_does_not_create() {
    let tree = TopicTree::new();
    assert!(tree.lookup("missing/path").is_none());
    assert!(tree.deliver("missing/path", true).is_empty());
    assert_eq!(tree.node_count(), 1);
}

#[test]
fn test_attach_registers_at_leaf_only() {
    let mut tree = TopicTree::new();
    tree.attach("a".to_string(), "rooms/1");

    let leaf = tree.lookup("rooms/1").unwrap();
    let parent = tree.lookup("rooms").unwrap();
    assert!(tree.node(leaf).unwrap().subscribers.contains("a"));
    assert!(tree.node(parent).unwrap().subscribers.is_empty());
    assert_eq!(tree.path_of(&"a".to_string()).as_deref(), Some("rooms/1"));
}

#[test]
#[should_panic(expected = "already attached")]
fn test_double_attach_panics() {
    let mut tree = TopicTree::new();
    tree.attach("a".to_string(), "x");
    tree.attach("a".to_string(), "y");
}

#[test]
fn test_detach_twice_is_noop() {
    let mut tree = TopicTree::new();
    tree.attach("a".to_string(), "x/y");
    tree.attach("b".to_string(), "x");

    assert!(tree.detach(&"a".to_string()));
    let nodes = tree.node_count();
    assert!(!tree.detach(&"a".to_string()));
    assert_eq!(tree.node_count(), nodes);
    assert!(tree.contains_path("x"));
    assert!(tree.is_pruned());
}

#[test]
fn test_detach_unknown_is_noop() {
    let mut tree = TopicTree::new();
    assert!(!tree.detach(&"ghost".to_string()));
    assert_eq!(tree.node_count(), 1);
}

#[test]
fn test_gc_leaves_only_root() {
    let mut tree = TopicTree::new();
    tree.attach("a".to_string(), "x");
    tree.detach(&"a".to_string());
    tree.attach("b".to_string(), "x/y");
    tree.detach(&"b".to_string());

    assert_eq!(tree.node_count(), 1);
    assert!(tree.node(tree.root()).unwrap().children.is_empty());
}

#[test]
fn test_gc_stops_at_non_empty_ancestor() {
    let mut tree = TopicTree::new();
    tree.attach("a".to_string(), "a");
    tree.attach("b".to_string(), "a/b/c/d");
    tree.detach(&"b".to_string());

    assert!(tree.contains_path("a"));
    assert!(!tree.contains_path("a/b"));
    assert_eq!(tree.node_count(), 2);
}

#[test]
fn test_gc_keeps_sibling_branch() {
    let mut tree = TopicTree::new();
    tree.attach("a".to_string(), "p/q/r");
    tree.attach("b".to_string(), "p/s");
    tree.detach(&"a".to_string());

    assert!(tree.contains_path("p/s"));
    assert!(!tree.contains_path("p/q"));
    assert!(tree.is_pruned());
}

#[test]
fn test_random_attach_detach_keeps_tree_pruned() {
    const PATHS: [&str; 7] = ["a", "a/b", "a/b/c", "a/d", "e", "e/f/g", ""];
    let mut tree = TopicTree::new();
    let mut attached: Vec<String> = Vec::new();
    let mut seed: u64 = 0x2545_f491_4f6c_dd1d;

    for step in 0..2_000 {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;

        if attached.is_empty() || seed % 3 != 0 {
            let id = format!("sub-{step}");
            tree.attach(id.clone(), PATHS[(seed >> 8) as usize % PATHS.len()]);
            attached.push(id);
        } else {
            let victim = attached.swap_remove((seed >> 16) as usize % attached.len());
            assert!(tree.detach(&victim));
        }
        assert!(tree.is_pruned(), "empty node retained at step {step}");
        assert_eq!(tree.subscriber_count(), attached.len());
    }

    for id in attached.drain(..) {
        tree.detach(&id);
    }
    assert_eq!(tree.node_count(), 1);
}

#[test]
fn test_deliver_prefix_respects_subchannels() {
    let mut tree = TopicTree::new();
    tree.attach("parent".to_string(), "p1");
    tree.attach("child".to_string(), "p1/suffix");
    tree.attach("deep".to_string(), "p1/suffix/more");

    assert_eq!(tree.deliver("p1", false), vec!["parent".to_string()]);
    assert_eq!(
        sorted(tree.deliver("p1", true)),
        vec!["child".to_string(), "deep".to_string(), "parent".to_string()]
    );
}

#[test]
fn test_deliver_lists_own_subscribers_before_descendants() {
    let mut tree = TopicTree::new();
    tree.attach("c".to_string(), "r/x");
    tree.attach("a".to_string(), "r");

    let ids = tree.deliver("r", true);
    assert_eq!(ids.first().map(String::as_str), Some("a"));
    assert_eq!(ids.len(), 2);
}

#[test]
fn test_broker_new() {
    let broker = Broker::default();
    assert!(broker.clients.is_empty());
    assert_eq!(broker.topics.node_count(), 1);
}

#[test]
fn test_broker_attach_and_detach() {
    let mut broker = Broker::new();
    let (id, _rx) = connect(&mut broker, "test_topic");
    assert!(broker.clients.contains_key(&id));
    assert!(broker.topics.is_attached(&id));

    assert!(broker.detach(&id));
    assert!(!broker.clients.contains_key(&id));
    assert!(!broker.topics.contains_path("test_topic"));
    assert!(!broker.detach(&id));
}

#[test]
fn test_dispatch_room_scenario() {
    let mut broker = Broker::new();
    let (_, mut a) = connect(&mut broker, "rooms/1");
    let (_, mut b) = connect(&mut broker, "rooms/1");
    let (_, mut c) = connect(&mut broker, "rooms/1/chat");

    assert_eq!(broker.dispatch(&record("rooms/1/", "hello")), 3);
    assert_eq!(received(&mut a), vec!["hello"]);
    assert_eq!(received(&mut b), vec!["hello"]);
    assert_eq!(received(&mut c), vec!["hello"]);

    assert_eq!(broker.dispatch(&record("rooms/1", "hi")), 2);
    assert_eq!(received(&mut a), vec!["hi"]);
    assert_eq!(received(&mut b), vec!["hi"]);
    assert!(received(&mut c).is_empty());
}

#[test]
fn test_dispatch_to_unknown_topic_creates_nothing() {
    let mut broker = Broker::new();
    assert_eq!(broker.dispatch(&record("nobody/here/", "x")), 0);
    assert_eq!(broker.topics.node_count(), 1);
}

#[test]
fn test_dispatch_detaches_closed_connection() {
    let mut broker = Broker::new();
    let (gone_id, gone_rx) = connect(&mut broker, "t/gone");
    let (_, mut live) = connect(&mut broker, "t");
    drop(gone_rx);

    assert_eq!(broker.dispatch(&record("t/", "ping")), 1);
    assert_eq!(received(&mut live), vec!["ping"]);
    assert!(!broker.clients.contains_key(&gone_id));
    assert!(!broker.topics.contains_path("t/gone"));
    assert!(broker.topics.is_pruned());
}

#[test]
fn test_dispatch_sends_payload_verbatim() {
    let mut broker = Broker::new();
    let (_, mut rx) = connect(&mut broker, "raw");
    let payload = "{\"not\": \"wrapped\"}";

    broker.dispatch(&record("raw", payload));
    assert_eq!(received(&mut rx), vec![payload]);
}
