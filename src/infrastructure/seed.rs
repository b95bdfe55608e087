//! Default topic catalog and site ban list for a fresh store.

/// `(key, menu label, [(topic name, display label)])`
pub type CategorySeed = (&'static str, &'static str, &'static [(&'static str, &'static str)]);

pub const CATEGORIES: &[CategorySeed] = &[
    (
        "dev",
        "Programming ▶️",
        &[
            ("programming", "Programming"),
            ("cpp", "C++"),
            ("java", "Java"),
            ("jvm", "JVM"),
            ("sql", "SQL"),
        ],
    ),
    (
        "webdev",
        "Web Development ▶️",
        &[
            ("webdev", "Webdev"),
            ("php", "PHP"),
            ("nodejs", "Node.JS"),
            ("webdesign", "Web Design"),
            ("html", "HTML"),
            ("css", "CSS"),
        ],
    ),
    (
        "os",
        "Operating Systems ▶️",
        &[
            ("os", "OS"),
            ("windows", "Windows"),
            ("macos", "macOS"),
            ("linux", "Linux"),
            ("android", "Android"),
        ],
    ),
    (
        "algo",
        "Algorithms & Co. ▶️",
        &[
            ("ai", "Artificial Intelligence"),
            ("algorithms", "Algorithms"),
            ("machinelearning", "Machine Learning"),
            ("deeplearning", "Deep Learning"),
        ],
    ),
    (
        "engi",
        "Engineering ▶️",
        &[
            ("uml", "UML"),
            ("tdd", "Test-Driven Dev."),
            ("testing", "Testing"),
            ("git", "Git"),
        ],
    ),
    ("dbs", "Database & servers ▶️", &[("db", "Database"), ("server", "Server")]),
    (
        "others",
        "Miscellaneous ▶️",
        &[
            ("iot", "IoT"),
            ("networking", "Networking"),
            ("security", "Security"),
            ("hardware", "Hardware"),
            ("gamedev", "Game Development"),
            ("technology", "Technology"),
        ],
    ),
];

pub const BANNED_SITES: &[&str] = &[
    "xnxx.com",
    "pornhub.com",
    "youporn.com",
    "youporngay.com",
    "xvideos.com",
    "brazzers.com",
    "redtube.com",
    "gufoporno.com",
    "youjizz.com",
    "xhamster.com",
];
