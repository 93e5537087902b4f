//! The content-code registry.
//!
//! Every DMAP field is identified by a 4-byte ASCII tag and carries a wire
//! type fixed by the registry, not by the value a node happens to hold. The
//! bundled [`default_bag`] is the compatibility contract with clients: it is
//! what `/content-codes` advertises, and the decoder will not accept a code
//! that is missing from it.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// A four-character content code such as `mlit` or `miid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentCode(pub [u8; 4]);

impl ContentCode {
    /// The code's tag as a big-endian integer, the form `mcnm` carries it in.
    #[must_use]
    pub fn as_u32(&self) -> u32 {
        u32::from_be_bytes(self.0)
    }
}

impl fmt::Display for ContentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => f.write_str(s),
            Err(_) => write!(f, "{:02x?}", self.0),
        }
    }
}

/// Wire type of a content code.
///
/// The numeric values are what `/content-codes` reports in `mcty` and they
/// fix the payload width: `Byte` is 1 octet, `Short` 2, `Int` 4, `Long` 8,
/// `Date` a 4-octet unix timestamp, `Version` a 4-octet major/minor/patch
/// quad, `Str` UTF-8 with no terminator, `Container` a concatenation of
/// child nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ContentType {
    Byte = 1,
    Short = 3,
    Int = 5,
    Long = 7,
    Str = 9,
    Date = 10,
    Version = 11,
    Container = 12,
}

/// Registry mapping content codes to their long names and wire types.
pub struct ContentCodeBag {
    entries: HashMap<ContentCode, (&'static str, ContentType)>,
    order: Vec<ContentCode>,
}

impl ContentCodeBag {
    fn from_table(table: &[(ContentCode, &'static str, ContentType)]) -> Self {
        let mut entries = HashMap::with_capacity(table.len());
        let mut order = Vec::with_capacity(table.len());
        for &(code, name, ty) in table {
            entries.insert(code, (name, ty));
            order.push(code);
        }
        Self { entries, order }
    }

    /// Looks up the wire type registered for `code`.
    #[must_use]
    pub fn content_type(&self, code: ContentCode) -> Option<ContentType> {
        self.entries.get(&code).map(|&(_, ty)| ty)
    }

    /// Looks up the long name (e.g. `dmap.itemid`) registered for `code`.
    #[must_use]
    pub fn name(&self, code: ContentCode) -> Option<&'static str> {
        self.entries.get(&code).map(|&(name, _)| name)
    }

    /// Iterates the registry in its canonical advertisement order.
    pub fn iter(&self) -> impl Iterator<Item = (ContentCode, &'static str, ContentType)> + '_ {
        self.order.iter().map(move |&code| {
            let &(name, ty) = &self.entries[&code];
            (code, name, ty)
        })
    }

    /// Number of registered codes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

// dmap.* plumbing
pub const MSTT: ContentCode = ContentCode(*b"mstt");
pub const MIID: ContentCode = ContentCode(*b"miid");
pub const MIKD: ContentCode = ContentCode(*b"mikd");
pub const MINM: ContentCode = ContentCode(*b"minm");
pub const MPER: ContentCode = ContentCode(*b"mper");
pub const MCON: ContentCode = ContentCode(*b"mcon");
pub const MCTI: ContentCode = ContentCode(*b"mcti");
pub const MPCO: ContentCode = ContentCode(*b"mpco");
pub const MLCL: ContentCode = ContentCode(*b"mlcl");
pub const MLIT: ContentCode = ContentCode(*b"mlit");
pub const MBCL: ContentCode = ContentCode(*b"mbcl");
pub const MDCL: ContentCode = ContentCode(*b"mdcl");
pub const MSRV: ContentCode = ContentCode(*b"msrv");
pub const MSAU: ContentCode = ContentCode(*b"msau");
pub const MSLR: ContentCode = ContentCode(*b"mslr");
pub const MPRO: ContentCode = ContentCode(*b"mpro");
pub const MSAL: ContentCode = ContentCode(*b"msal");
pub const MSUP: ContentCode = ContentCode(*b"msup");
pub const MSPI: ContentCode = ContentCode(*b"mspi");
pub const MSEX: ContentCode = ContentCode(*b"msex");
pub const MSBR: ContentCode = ContentCode(*b"msbr");
pub const MSQY: ContentCode = ContentCode(*b"msqy");
pub const MSIX: ContentCode = ContentCode(*b"msix");
pub const MSRS: ContentCode = ContentCode(*b"msrs");
pub const MSTM: ContentCode = ContentCode(*b"mstm");
pub const MSDC: ContentCode = ContentCode(*b"msdc");
pub const MLOG: ContentCode = ContentCode(*b"mlog");
pub const MLID: ContentCode = ContentCode(*b"mlid");
pub const MUPD: ContentCode = ContentCode(*b"mupd");
pub const MUSR: ContentCode = ContentCode(*b"musr");
pub const MUTY: ContentCode = ContentCode(*b"muty");
pub const MUDL: ContentCode = ContentCode(*b"mudl");
pub const MTCO: ContentCode = ContentCode(*b"mtco");
pub const MRCO: ContentCode = ContentCode(*b"mrco");
pub const MCCR: ContentCode = ContentCode(*b"mccr");
pub const MCNM: ContentCode = ContentCode(*b"mcnm");
pub const MCNA: ContentCode = ContentCode(*b"mcna");
pub const MCTY: ContentCode = ContentCode(*b"mcty");
pub const MIMC: ContentCode = ContentCode(*b"mimc");
pub const MCTC: ContentCode = ContentCode(*b"mctc");

// daap.* namespace
pub const APRO: ContentCode = ContentCode(*b"apro");
pub const AVDB: ContentCode = ContentCode(*b"avdb");
pub const ADBS: ContentCode = ContentCode(*b"adbs");
pub const APLY: ContentCode = ContentCode(*b"aply");
pub const APSO: ContentCode = ContentCode(*b"apso");
pub const ABPL: ContentCode = ContentCode(*b"abpl");
pub const ASAL: ContentCode = ContentCode(*b"asal");
pub const ASAR: ContentCode = ContentCode(*b"asar");
pub const ASBR: ContentCode = ContentCode(*b"asbr");
pub const ASCM: ContentCode = ContentCode(*b"ascm");
pub const ASCO: ContentCode = ContentCode(*b"asco");
pub const ASDA: ContentCode = ContentCode(*b"asda");
pub const ASDM: ContentCode = ContentCode(*b"asdm");
pub const ASDC: ContentCode = ContentCode(*b"asdc");
pub const ASDN: ContentCode = ContentCode(*b"asdn");
pub const ASDB: ContentCode = ContentCode(*b"asdb");
pub const ASDK: ContentCode = ContentCode(*b"asdk");
pub const ASDT: ContentCode = ContentCode(*b"asdt");
pub const ASEQ: ContentCode = ContentCode(*b"aseq");
pub const ASFM: ContentCode = ContentCode(*b"asfm");
pub const ASGN: ContentCode = ContentCode(*b"asgn");
pub const ASRV: ContentCode = ContentCode(*b"asrv");
pub const ASSR: ContentCode = ContentCode(*b"assr");
pub const ASSZ: ContentCode = ContentCode(*b"assz");
pub const ASST: ContentCode = ContentCode(*b"asst");
pub const ASSP: ContentCode = ContentCode(*b"assp");
pub const ASTM: ContentCode = ContentCode(*b"astm");
pub const ASTC: ContentCode = ContentCode(*b"astc");
pub const ASTN: ContentCode = ContentCode(*b"astn");
pub const ASUL: ContentCode = ContentCode(*b"asul");
pub const ASUR: ContentCode = ContentCode(*b"asur");
pub const ASYR: ContentCode = ContentCode(*b"asyr");

#[rustfmt::skip]
const DEFAULT_TABLE: &[(ContentCode, &str, ContentType)] = &[
    (MSTT, "dmap.status",                 ContentType::Int),
    (MIID, "dmap.itemid",                 ContentType::Int),
    (MIKD, "dmap.itemkind",               ContentType::Byte),
    (MINM, "dmap.itemname",               ContentType::Str),
    (MPER, "dmap.persistentid",           ContentType::Long),
    (MCON, "dmap.container",              ContentType::Container),
    (MCTI, "dmap.containeritemid",        ContentType::Int),
    (MPCO, "dmap.parentcontainerid",      ContentType::Int),
    (MLCL, "dmap.listing",                ContentType::Container),
    (MLIT, "dmap.listingitem",            ContentType::Container),
    (MBCL, "dmap.bag",                    ContentType::Container),
    (MDCL, "dmap.dictionary",             ContentType::Container),
    (MSRV, "dmap.serverinforesponse",     ContentType::Container),
    (MSAU, "dmap.authenticationmethod",   ContentType::Byte),
    (MSLR, "dmap.loginrequired",          ContentType::Byte),
    (MPRO, "dmap.protocolversion",        ContentType::Version),
    (MSAL, "dmap.supportsautologout",     ContentType::Byte),
    (MSUP, "dmap.supportsupdate",         ContentType::Byte),
    (MSPI, "dmap.supportspersistentids",  ContentType::Byte),
    (MSEX, "dmap.supportsextensions",     ContentType::Byte),
    (MSBR, "dmap.supportsbrowse",         ContentType::Byte),
    (MSQY, "dmap.supportsquery",          ContentType::Byte),
    (MSIX, "dmap.supportsindex",          ContentType::Byte),
    (MSRS, "dmap.supportsresolve",        ContentType::Byte),
    (MSTM, "dmap.timeoutinterval",        ContentType::Int),
    (MSDC, "dmap.databasescount",         ContentType::Int),
    (MLOG, "dmap.loginresponse",          ContentType::Container),
    (MLID, "dmap.sessionid",              ContentType::Int),
    (MUPD, "dmap.updateresponse",         ContentType::Container),
    (MUSR, "dmap.serverrevision",         ContentType::Int),
    (MUTY, "dmap.updatetype",             ContentType::Byte),
    (MUDL, "dmap.deletedidlisting",       ContentType::Container),
    (MTCO, "dmap.specifiedtotalcount",    ContentType::Int),
    (MRCO, "dmap.returnedcount",          ContentType::Int),
    (MCCR, "dmap.contentcodesresponse",   ContentType::Container),
    (MCNM, "dmap.contentcodesnumber",     ContentType::Int),
    (MCNA, "dmap.contentcodesname",       ContentType::Str),
    (MCTY, "dmap.contentcodestype",       ContentType::Short),
    (MIMC, "dmap.itemcount",              ContentType::Int),
    (MCTC, "dmap.containercount",         ContentType::Int),
    (APRO, "daap.protocolversion",        ContentType::Version),
    (AVDB, "daap.serverdatabases",        ContentType::Container),
    (ADBS, "daap.databasesongs",          ContentType::Container),
    (APLY, "daap.databaseplaylists",      ContentType::Container),
    (APSO, "daap.playlistsongs",          ContentType::Container),
    (ABPL, "daap.baseplaylist",           ContentType::Byte),
    (ASAL, "daap.songalbum",              ContentType::Str),
    (ASAR, "daap.songartist",             ContentType::Str),
    (ASBR, "daap.songbitrate",            ContentType::Short),
    (ASCM, "daap.songcomment",            ContentType::Str),
    (ASCO, "daap.songcompilation",        ContentType::Byte),
    (ASDA, "daap.songdateadded",          ContentType::Date),
    (ASDM, "daap.songdatemodified",       ContentType::Date),
    (ASDC, "daap.songdisccount",          ContentType::Short),
    (ASDN, "daap.songdiscnumber",         ContentType::Short),
    (ASDB, "daap.songdisabled",           ContentType::Byte),
    (ASDK, "daap.songdatakind",           ContentType::Byte),
    (ASDT, "daap.songdescription",        ContentType::Str),
    (ASEQ, "daap.songeqpreset",           ContentType::Str),
    (ASFM, "daap.songformat",             ContentType::Str),
    (ASGN, "daap.songgenre",              ContentType::Str),
    (ASRV, "daap.songrelativevolume",     ContentType::Byte),
    (ASSR, "daap.songsamplerate",         ContentType::Int),
    (ASSZ, "daap.songsize",               ContentType::Int),
    (ASST, "daap.songstarttime",          ContentType::Int),
    (ASSP, "daap.songstoptime",           ContentType::Int),
    (ASTM, "daap.songtime",               ContentType::Int),
    (ASTC, "daap.songtrackcount",         ContentType::Short),
    (ASTN, "daap.songtracknumber",        ContentType::Short),
    (ASUL, "daap.songdataurl",            ContentType::Str),
    (ASUR, "daap.songuserrating",         ContentType::Byte),
    (ASYR, "daap.songyear",               ContentType::Short),
];

/// Returns the bundled registry shared by the whole process.
pub fn default_bag() -> &'static ContentCodeBag {
    static BAG: OnceLock<ContentCodeBag> = OnceLock::new();
    BAG.get_or_init(|| ContentCodeBag::from_table(DEFAULT_TABLE))
}
