//! End-to-end protocol tests over loopback TCP.
//!
//! Each test boots a real server against a scripted in-memory library,
//! speaks raw HTTP at it, and picks the DMAP bodies apart with the codec's
//! own decoder.

use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use tunecast_core::dmap::codes::*;
use tunecast_core::dmap::{default_bag, Node};
use tunecast_core::{
    Artwork, AudioSource, AuthMethod, Credential, DaapServer, MediaLibrary, NoopEvents, Playlist,
    ServerConfig, ServerEvents, Track,
};

// ─────────────────────────────────────────────────────────────────────────────
// Fixtures
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory library whose contents tests mutate mid-flight.
struct ScriptedLibrary {
    tracks: Mutex<Vec<Track>>,
    playlists: Mutex<Vec<Playlist>>,
    artwork: Option<Vec<u8>>,
}

impl ScriptedLibrary {
    fn new(track_ids: &[u32]) -> Self {
        Self {
            tracks: Mutex::new(track_ids.iter().map(|&id| make_track(id)).collect()),
            playlists: Mutex::new(Vec::new()),
            artwork: None,
        }
    }

    fn set_tracks(&self, track_ids: &[u32]) {
        *self.tracks.lock() = track_ids.iter().map(|&id| make_track(id)).collect();
    }

    fn set_playlist(&self, id: u32, name: &str, track_ids: &[u32]) {
        let mut playlists = self.playlists.lock();
        playlists.retain(|p| p.id != id);
        playlists.push(Playlist {
            id,
            name: name.to_string(),
            track_ids: track_ids.to_vec(),
        });
    }
}

/// 1000 recognizable bytes per track, so range assertions can check content.
fn audio_bytes(id: u32) -> Vec<u8> {
    (0..1000u32).map(|i| ((i + id) % 256) as u8).collect()
}

fn make_track(id: u32) -> Track {
    Track {
        id,
        title: format!("track {id}"),
        artist: "Artist".to_string(),
        album: "Album".to_string(),
        format: "mp3".to_string(),
        duration_ms: 60_000,
        size_bytes: 1000,
        ..Default::default()
    }
}

impl MediaLibrary for ScriptedLibrary {
    fn database_id(&self) -> u32 {
        1
    }
    fn database_name(&self) -> String {
        "Test".to_string()
    }
    fn tracks(&self) -> Vec<Track> {
        self.tracks.lock().clone()
    }
    fn track(&self, id: u32) -> Option<Track> {
        self.tracks.lock().iter().find(|t| t.id == id).cloned()
    }
    fn playlists(&self) -> Vec<Playlist> {
        self.playlists.lock().clone()
    }
    fn playlist(&self, id: u32) -> Option<Playlist> {
        self.playlists.lock().iter().find(|p| p.id == id).cloned()
    }
    fn open_audio(&self, track: &Track) -> io::Result<AudioSource> {
        let bytes = audio_bytes(track.id);
        let len = bytes.len() as u64;
        Ok(AudioSource::new(std::io::Cursor::new(bytes), len))
    }
    fn artwork(&self, _track: &Track) -> Option<Artwork> {
        self.artwork.as_ref().map(|bytes| Artwork {
            bytes: bytes.clone(),
            mime_subtype: "jpeg".to_string(),
        })
    }
}

/// Counts login events; scenario 5 asserts the cap fires before the event.
struct CountingEvents {
    logins: AtomicUsize,
}

impl ServerEvents for CountingEvents {
    fn user_login(&self, _session_id: u32, _username: Option<&str>, _remote: IpAddr) {
        self.logins.fetch_add(1, Ordering::SeqCst);
    }
    fn user_logout(&self, _session_id: u32, _username: Option<&str>) {}
    fn track_requested(&self, _track_id: u32, _remote: IpAddr) {}
    fn database_requested(&self, _remote: IpAddr) {}
    fn name_collision(&self, _name: &str) {}
}

fn test_config() -> ServerConfig {
    ServerConfig {
        name: "Test".to_string(),
        port: 0,
        publish: false,
        ..Default::default()
    }
}

async fn start_server(
    config: ServerConfig,
    library: Arc<ScriptedLibrary>,
    events: Arc<dyn ServerEvents>,
) -> (DaapServer, u16) {
    let server = DaapServer::new(config, library, events).unwrap();
    let port = server.start().await.unwrap();
    (server, port)
}

// ─────────────────────────────────────────────────────────────────────────────
// Minimal HTTP client
// ─────────────────────────────────────────────────────────────────────────────

struct Response {
    status: u16,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl Response {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    fn dmap(&self) -> Node {
        Node::decode(&self.body, default_bag()).expect("body is not valid dmap")
    }
}

struct Client {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl Client {
    async fn connect(port: u16) -> Self {
        let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        Self { stream, buf: Vec::new() }
    }

    async fn get(&mut self, target: &str, headers: &[(&str, &str)]) -> Response {
        let mut request = format!("GET {target} HTTP/1.1\r\nHost: localhost\r\n");
        for (name, value) in headers {
            request.push_str(&format!("{name}: {value}\r\n"));
        }
        request.push_str("\r\n");
        self.stream.write_all(request.as_bytes()).await.unwrap();
        self.read_response().await
    }

    async fn read_response(&mut self) -> Response {
        let head_end = loop {
            if let Some(pos) = self
                .buf
                .windows(4)
                .position(|window| window == b"\r\n\r\n")
            {
                break pos + 4;
            }
            self.fill().await;
        };
        let head = String::from_utf8(self.buf[..head_end].to_vec()).unwrap();
        let mut lines = head.lines();
        let status: u16 = lines
            .next()
            .unwrap()
            .split(' ')
            .nth(1)
            .unwrap()
            .parse()
            .unwrap();
        let headers: HashMap<String, String> = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.to_lowercase(), value.trim().to_string()))
            .collect();

        let content_length: usize = headers
            .get("content-length")
            .expect("response without content-length")
            .parse()
            .unwrap();
        while self.buf.len() < head_end + content_length {
            self.fill().await;
        }
        let body = self.buf[head_end..head_end + content_length].to_vec();
        self.buf.drain(..head_end + content_length);
        Response { status, headers, body }
    }

    async fn fill(&mut self) {
        let mut chunk = [0u8; 4096];
        let n = self.stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "server closed the connection mid-response");
        self.buf.extend_from_slice(&chunk[..n]);
    }
}

/// Runs the login handshake and returns the issued session id.
async fn login(client: &mut Client) -> u32 {
    let response = client.get("/login", &[]).await;
    assert_eq!(response.status, 200);
    response.dmap().child(MLID).unwrap().as_u64().unwrap() as u32
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn handshake_and_long_poll_update() {
    let library = Arc::new(ScriptedLibrary::new(&[1, 2, 3]));
    let (server, port) = start_server(test_config(), Arc::clone(&library), Arc::new(NoopEvents)).await;

    let mut client = Client::connect(port).await;

    // /server-info
    let response = client.get("/server-info", &[]).await;
    assert_eq!(response.status, 200);
    assert_eq!(
        response.header("content-type"),
        Some("application/x-dmap-tagged")
    );
    let info = response.dmap();
    assert_eq!(info.code, MSRV);
    assert_eq!(info.child(MINM).unwrap().as_str(), Some("Test"));
    assert_eq!(info.child(MSDC).unwrap().as_u64(), Some(1));

    // /content-codes
    let response = client.get("/content-codes", &[]).await;
    let codes = response.dmap();
    assert_eq!(codes.code, MCCR);
    let advertised: Vec<u64> = codes
        .children()
        .iter()
        .filter(|c| c.code == MDCL)
        .map(|c| c.child(MCNM).unwrap().as_u64().unwrap())
        .collect();
    for expected in [MIID, MINM, MSTT] {
        assert!(advertised.contains(&u64::from(expected.as_u32())));
    }

    // /login
    let session = login(&mut client).await;
    assert!(session > 0);

    // /update long-poll: parks until the library changes
    let update = tokio::spawn(async move {
        let mut client = Client::connect(port).await;
        client
            .get(
                &format!("/update?session-id={session}&revision-number=1"),
                &[],
            )
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!update.is_finished(), "update must block until a change");

    library.set_tracks(&[1, 2, 3, 4]);
    server.change_sender().send(()).unwrap();

    let response = tokio::time::timeout(Duration::from_secs(2), update)
        .await
        .unwrap()
        .unwrap();
    let update = response.dmap();
    assert_eq!(update.code, MUPD);
    assert_eq!(update.child(MUSR).unwrap().as_u64(), Some(2));

    server.stop();
}

#[tokio::test]
async fn full_listing_then_delta_with_deletions() {
    let library = Arc::new(ScriptedLibrary::new(&[1, 2, 3]));
    let (server, port) = start_server(test_config(), Arc::clone(&library), Arc::new(NoopEvents)).await;

    let mut client = Client::connect(port).await;
    let session = login(&mut client).await;

    // full listing
    let target = format!(
        "/databases/1/items?session-id={session}&meta=dmap.itemid,dmap.itemname"
    );
    let response = client.get(&target, &[]).await;
    let listing = response.dmap();
    assert_eq!(listing.code, ADBS);
    assert_eq!(listing.child(MUTY).unwrap().as_u64(), Some(0));
    assert_eq!(listing.child(MTCO).unwrap().as_u64(), Some(3));
    assert_eq!(listing.child(MRCO).unwrap().as_u64(), Some(3));
    assert_eq!(listing.child(MLCL).unwrap().children().len(), 3);
    assert!(listing.child(MUDL).is_none());

    // byte-identical across repeated requests
    let again = client.get(&target, &[]).await;
    assert_eq!(response.body, again.body);

    // delta=0 behaves like no delta at all
    let with_zero = client.get(&format!("{target}&delta=0"), &[]).await;
    assert_eq!(response.body, with_zero.body);

    // drop track 2, wait for the revision to advance
    library.set_tracks(&[1, 3]);
    server.change_sender().send(()).unwrap();
    let update = client
        .get(
            &format!("/update?session-id={session}&revision-number=1"),
            &[],
        )
        .await;
    let new_revision = update.dmap().child(MUSR).unwrap().as_u64().unwrap();
    assert_eq!(new_revision, 2);

    // delta against revision 1
    let response = client
        .get(
            &format!(
                "/databases/1/items?session-id={session}\
                 &meta=dmap.itemid,dmap.itemname&revision-number={new_revision}&delta=1"
            ),
            &[],
        )
        .await;
    let listing = response.dmap();
    assert_eq!(listing.child(MUTY).unwrap().as_u64(), Some(1));
    assert_eq!(listing.child(MTCO).unwrap().as_u64(), Some(2));
    assert_eq!(listing.child(MRCO).unwrap().as_u64(), Some(2));
    assert_eq!(listing.child(MLCL).unwrap().children().len(), 2);
    let deleted = listing.child(MUDL).expect("delta must carry deletions");
    assert_eq!(deleted.children().len(), 1);
    assert_eq!(deleted.children()[0].as_u64(), Some(2));

    server.stop();
}

#[tokio::test]
async fn ranged_audio_stream() {
    let library = Arc::new(ScriptedLibrary::new(&[7]));
    let (server, port) = start_server(test_config(), Arc::clone(&library), Arc::new(NoopEvents)).await;

    let mut client = Client::connect(port).await;
    let session = login(&mut client).await;

    let response = client
        .get(
            &format!("/databases/1/items/7.mp3?session-id={session}"),
            &[("Range", "bytes=200-")],
        )
        .await;
    assert_eq!(response.status, 206);
    assert_eq!(response.header("content-length"), Some("800"));
    assert_eq!(
        response.header("content-range"),
        Some("bytes 200-1000/1001")
    );
    assert_eq!(response.body, &audio_bytes(7)[200..]);

    // range from zero is an ordinary 200
    let mut client = Client::connect(port).await;
    let session = login(&mut client).await;
    let response = client
        .get(
            &format!("/databases/1/items/7.mp3?session-id={session}"),
            &[("Range", "bytes=0-")],
        )
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body.len(), 1000);

    server.stop();
}

#[tokio::test]
async fn auth_challenge_then_success() {
    let config = ServerConfig {
        auth_method: AuthMethod::Password,
        credentials: vec![Credential { username: None, password: "hunter2".into() }],
        ..test_config()
    };
    let library = Arc::new(ScriptedLibrary::new(&[1]));
    let (server, port) = start_server(config, library, Arc::new(NoopEvents)).await;

    // no credentials
    let mut client = Client::connect(port).await;
    let response = client.get("/login", &[]).await;
    assert_eq!(response.status, 401);
    assert_eq!(
        response.header("www-authenticate"),
        Some("Basic realm=\"Test\"")
    );

    // ":wrong"
    let response = client
        .get("/login", &[("Authorization", "Basic Ondyb25n")])
        .await;
    assert_eq!(response.status, 401);

    // ":hunter2"
    let response = client
        .get("/login", &[("Authorization", "Basic Omh1bnRlcjI=")])
        .await;
    assert_eq!(response.status, 200);
    assert!(response.dmap().child(MLID).is_some());

    server.stop();
}

#[tokio::test]
async fn session_cap_rejects_before_login_event() {
    let events = Arc::new(CountingEvents { logins: AtomicUsize::new(0) });
    let config = ServerConfig { max_users: 1, ..test_config() };
    let library = Arc::new(ScriptedLibrary::new(&[1]));
    let (server, port) = start_server(config, library, Arc::clone(&events) as Arc<dyn ServerEvents>).await;

    let mut first = Client::connect(port).await;
    let response = first.get("/login", &[]).await;
    assert_eq!(response.status, 200);

    let mut second = Client::connect(port).await;
    let response = second.get("/login", &[]).await;
    assert_eq!(response.status, 503);
    assert_eq!(response.body, b"too many users");

    assert_eq!(events.logins.load(Ordering::SeqCst), 1);

    server.stop();
}

#[tokio::test]
async fn unknown_session_is_forbidden_everywhere_but_the_open_endpoints() {
    let library = Arc::new(ScriptedLibrary::new(&[1]));
    let (server, port) = start_server(test_config(), library, Arc::new(NoopEvents)).await;

    let mut client = Client::connect(port).await;
    for open in ["/server-info", "/content-codes"] {
        let response = client.get(open, &[]).await;
        assert_eq!(response.status, 200, "{open} must not need a session");
    }
    for guarded in [
        "/databases?session-id=4242",
        "/databases/1/items?session-id=4242",
        "/databases/1/containers?session-id=4242",
    ] {
        let response = client.get(guarded, &[]).await;
        assert_eq!(response.status, 403, "{guarded} must be forbidden");
        assert!(response.body.is_empty());
    }

    server.stop();
}

#[tokio::test]
async fn playlist_container_ids_survive_membership_changes() {
    let library = Arc::new(ScriptedLibrary::new(&[10, 20, 30, 40]));
    library.set_playlist(2, "Favorites", &[10, 20, 30]);
    let (server, port) = start_server(test_config(), Arc::clone(&library), Arc::new(NoopEvents)).await;

    let mut client = Client::connect(port).await;
    let session = login(&mut client).await;

    let entries = |node: &Node| -> Vec<(u64, u64)> {
        node.child(MLCL)
            .unwrap()
            .children()
            .iter()
            .map(|item| {
                (
                    item.child(MIID).unwrap().as_u64().unwrap(),
                    item.child(MCTI).unwrap().as_u64().unwrap(),
                )
            })
            .collect()
    };

    // the playlist shows up in the containers listing next to the base one
    let response = client
        .get(&format!("/databases/1/containers?session-id={session}"), &[])
        .await;
    let listing = response.dmap();
    assert_eq!(listing.code, APLY);
    let names: Vec<&str> = listing
        .child(MLCL)
        .unwrap()
        .children()
        .iter()
        .map(|item| item.child(MINM).unwrap().as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Test", "Favorites"]);

    // initial membership: container ids 1..=3
    let target = format!("/databases/1/containers/2/items?session-id={session}");
    let response = client.get(&target, &[]).await;
    assert_eq!(entries(&response.dmap()), vec![(10, 1), (20, 2), (30, 3)]);

    // remove the middle track and let the revision advance: survivors
    // keep their ids and the delta names the casualty
    library.set_playlist(2, "Favorites", &[10, 30]);
    server.change_sender().send(()).unwrap();
    let update = client
        .get(
            &format!("/update?session-id={session}&revision-number=1"),
            &[],
        )
        .await;
    assert_eq!(update.dmap().child(MUSR).unwrap().as_u64(), Some(2));

    let response = client
        .get(&format!("{target}&revision-number=2&delta=1"), &[])
        .await;
    let listing = response.dmap();
    assert_eq!(entries(&listing), vec![(10, 1), (30, 3)]);
    let deleted = listing.child(MUDL).expect("delta carries removals");
    assert_eq!(deleted.children()[0].as_u64(), Some(20));

    // append a track: a fresh id, never a reused one
    library.set_playlist(2, "Favorites", &[10, 30, 40]);
    let response = client.get(&target, &[]).await;
    assert_eq!(entries(&response.dmap()), vec![(10, 1), (30, 3), (40, 4)]);

    server.stop();
}

#[tokio::test]
async fn base_container_enumerates_all_tracks() {
    let library = Arc::new(ScriptedLibrary::new(&[5, 6]));
    let (server, port) = start_server(test_config(), library, Arc::new(NoopEvents)).await;

    let mut client = Client::connect(port).await;
    let session = login(&mut client).await;

    let response = client
        .get(
            &format!("/databases/1/containers/1/items?session-id={session}"),
            &[],
        )
        .await;
    let listing = response.dmap();
    assert_eq!(listing.code, APSO);
    let ids: Vec<u64> = listing
        .child(MLCL)
        .unwrap()
        .children()
        .iter()
        .map(|item| item.child(MIID).unwrap().as_u64().unwrap())
        .collect();
    assert_eq!(ids, vec![5, 6]);

    server.stop();
}

#[tokio::test]
async fn stopping_answers_parked_updates_with_404() {
    let library = Arc::new(ScriptedLibrary::new(&[1]));
    let (server, port) = start_server(test_config(), library, Arc::new(NoopEvents)).await;

    let mut client = Client::connect(port).await;
    let session = login(&mut client).await;

    let parked = tokio::spawn(async move {
        let mut client = Client::connect(port).await;
        client
            .get(
                &format!("/update?session-id={session}&revision-number=1"),
                &[],
            )
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    server.stop();

    let response = tokio::time::timeout(Duration::from_secs(2), parked)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.status, 404);
}
