// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Status-code and MIME lookup tables, initialized once, immutable forever.

use std::collections::HashMap;

use once_cell::sync::Lazy;

static STATUS_REASONS: Lazy<HashMap<u16, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (100, "Continue"),
        (101, "Switching Protocol"),
        (102, "Processing"),
        (103, "Early Hints"),
        (200, "OK"),
        (201, "Created"),
        (202, "Accepted"),
        (203, "Non-Authoritative Information"),
        (204, "No Content"),
        (205, "Reset Content"),
        (206, "Partial Content"),
        (207, "Multi-Status"),
        (208, "Already Reported"),
        (226, "IM Used"),
        (300, "Multiple Choice"),
        (301, "Moved Permanently"),
        (302, "Found"),
        (303, "See Other"),
        (304, "Not Modified"),
        (305, "Use Proxy"),
        (306, "unused"),
        (307, "Temporary Redirect"),
        (308, "Permanent Redirect"),
        (400, "Bad Request"),
        (401, "Unauthorized"),
        (402, "Payment Required"),
        (403, "Forbidden"),
        (404, "Not Found"),
        (405, "Method Not Allowed"),
        (406, "Not Acceptable"),
        (407, "Proxy Authentication Required"),
        (408, "Request Timeout"),
        (409, "Conflict"),
        (410, "Gone"),
        (411, "Length Required"),
        (412, "Precondition Failed"),
        (413, "Payload Too Large"),
        (414, "URI Too Long"),
        (415, "Unsupported Media Type"),
        (416, "Range Not Satisfiable"),
        (417, "Expectation Failed"),
        (418, "I'm a teapot"),
        (421, "Misdirected Request"),
        (422, "Unprocessable Entity"),
        (423, "Locked"),
        (424, "Failed Dependency"),
        (425, "Too Early"),
        (426, "Upgrade Required"),
        (428, "Precondition Required"),
        (429, "Too Many Requests"),
        (431, "Request Header Fields Too Large"),
        (451, "Unavailable For Legal Reasons"),
        (500, "Internal Server Error"),
        (501, "Not Implemented"),
        (502, "Bad Gateway"),
        (503, "Service Unavailable"),
        (504, "Gateway Timeout"),
        (505, "HTTP Version Not Supported"),
        (506, "Variant Also Negotiates"),
        (507, "Insufficient Storage"),
        (508, "Loop Detected"),
        (510, "Not Extended"),
        (511, "Network Authentication Required"),
    ])
});

static MIME_TYPES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (".aac", "audio/aac"),
        (".abw", "application/x-abiword"),
        (".arc", "application/x-freearc"),
        (".avi", "video/x-msvideo"),
        (".azw", "application/vnd.amazon.ebook"),
        (".bin", "application/octet-stream"),
        (".bmp", "image/bmp"),
        (".bz", "application/x-bzip"),
        (".bz2", "application/x-bzip2"),
        (".csh", "application/x-csh"),
        (".css", "text/css"),
        (".csv", "text/csv"),
        (".doc", "application/msword"),
        (
            ".docx",
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        ),
        (".eot", "application/vnd.ms-fontobject"),
        (".epub", "application/epub+zip"),
        (".gif", "image/gif"),
        (".htm", "text/html"),
        (".html", "text/html"),
        (".ico", "image/vnd.microsoft.icon"),
        (".ics", "text/calendar"),
        (".jar", "application/java-archive"),
        (".jpeg", "image/jpeg"),
        (".jpg", "image/jpeg"),
        (".js", "text/javascript"),
        (".json", "application/json"),
        (".jsonld", "application/ld+json"),
        (".mid", "audio/midi"),
        (".midi", "audio/x-midi"),
        (".mjs", "text/javascript"),
        (".mp3", "audio/mpeg"),
        (".mpeg", "video/mpeg"),
        (".mpkg", "application/vnd.apple.installer+xml"),
        (".odp", "application/vnd.oasis.opendocument.presentation"),
        (".ods", "application/vnd.oasis.opendocument.spreadsheet"),
        (".odt", "application/vnd.oasis.opendocument.text"),
        (".oga", "audio/ogg"),
        (".ogv", "video/ogg"),
        (".ogx", "application/ogg"),
        (".otf", "font/otf"),
        (".png", "image/png"),
        (".pdf", "application/pdf"),
        (".ppt", "application/vnd.ms-powerpoint"),
        (
            ".pptx",
            "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        ),
        (".rar", "application/x-rar-compressed"),
        (".rtf", "application/rtf"),
        (".sh", "application/x-sh"),
        (".svg", "image/svg+xml"),
        (".swf", "application/x-shockwave-flash"),
        (".tar", "application/x-tar"),
        (".tif", "image/tiff"),
        (".tiff", "image/tiff"),
        (".ttf", "font/ttf"),
        (".txt", "text/plain"),
        (".vsd", "application/vnd.visio"),
        (".wav", "audio/wav"),
        (".weba", "audio/webm"),
        (".webm", "video/webm"),
        (".webp", "image/webp"),
        (".woff", "font/woff"),
        (".woff2", "font/woff2"),
        (".xhtml", "application/xhtml+xml"),
        (".xls", "application/vnd.ms-excel"),
        (".xlsx", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
        (".xml", "application/xml"),
        (".xul", "application/vnd.mozilla.xul+xml"),
        (".zip", "application/zip"),
        (".3gp", "video/3gpp"),
        (".3g2", "video/3gpp2"),
        (".7z", "application/x-7z-compressed"),
    ])
});

/// The reason phrase for a status code; "Unknown" for anything unlisted.
pub fn reason_phrase(status: u16) -> &'static str {
    STATUS_REASONS.get(&status).copied().unwrap_or("Unknown")
}

/// The MIME type inferred from a filename's extension; binary stream when
/// the name has no extension or an unlisted one.
pub fn mime_for(filename: &str) -> &'static str {
    let Some(dot) = filename.rfind('.') else {
        return "application/octet-stream";
    };
    MIME_TYPES
        .get(&filename[dot..])
        .copied()
        .unwrap_or("application/octet-stream")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn known_and_unknown_status_codes() {
        assert_eq!("OK", reason_phrase(200));
        assert_eq!("URI Too Long", reason_phrase(414));
        assert_eq!("Unknown", reason_phrase(299));
    }

    #[test]
    fn mime_by_extension_with_binary_default() {
        assert_eq!("text/html", mime_for("index.html"));
        assert_eq!("image/png", mime_for("a.b.png"));
        assert_eq!("application/octet-stream", mime_for("Makefile"));
        assert_eq!("application/octet-stream", mime_for("data.unknownext"));
    }
}
