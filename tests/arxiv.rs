use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use mockito::{Matcher, Server};

use arxiv_harvester::app::App;
use arxiv_harvester::arxiv::{ArxivHttpClient, SearchClient};
use arxiv_harvester::config::ResolvedConfig;
use arxiv_harvester::domain::{SearchQuery, SortCriterion, SortOrder};
use arxiv_harvester::error::HarvestError;
use arxiv_harvester::fetcher::HttpDocumentClient;
use arxiv_harvester::output::JsonOutput;

fn feed(entries: &[(usize, String)]) -> String {
    let mut body = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>arXiv Query</title>
  <id>http://arxiv.org/api/query</id>
  <updated>2024-03-01T00:00:00Z</updated>
"#,
    );
    for (n, pdf) in entries {
        body.push_str(&format!(
            r#"  <entry>
    <id>http://arxiv.org/abs/2403.{n:05}v1</id>
    <updated>2024-03-01T00:00:00Z</updated>
    <title>Paper {n}</title>
    <summary>Abstract {n}</summary>
    <author><name>Author {n}</name></author>
    <link title="pdf" href="{pdf}" rel="related" type="application/pdf"/>
    <category term="cs.AI"/>
  </entry>
"#
        ));
    }
    body.push_str("</feed>\n");
    body
}

fn entries(range: std::ops::Range<usize>) -> Vec<(usize, String)> {
    range
        .map(|n| (n, format!("http://arxiv.org/pdf/2403.{n:05}v1")))
        .collect()
}

fn query(max_results: usize) -> SearchQuery {
    SearchQuery {
        query: "cat:cs.AI".to_string(),
        max_results,
        sort_by: SortCriterion::SubmittedDate,
        sort_order: SortOrder::Descending,
    }
}

fn page_matcher(start: usize, max_results: usize) -> Matcher {
    Matcher::AllOf(vec![
        Matcher::UrlEncoded("search_query".to_string(), "cat:cs.AI".to_string()),
        Matcher::UrlEncoded("start".to_string(), start.to_string()),
        Matcher::UrlEncoded("max_results".to_string(), max_results.to_string()),
        Matcher::UrlEncoded("sortBy".to_string(), "submittedDate".to_string()),
        Matcher::UrlEncoded("sortOrder".to_string(), "descending".to_string()),
    ])
}

#[test]
fn pages_until_max_results() {
    let mut server = Server::new();
    let first = server
        .mock("GET", "/api/query")
        .match_query(page_matcher(0, 2))
        .with_status(200)
        .with_header("content-type", "application/atom+xml")
        .with_body(feed(&entries(0..2)))
        .expect(1)
        .create();
    let second = server
        .mock("GET", "/api/query")
        .match_query(page_matcher(2, 1))
        .with_status(200)
        .with_header("content-type", "application/atom+xml")
        .with_body(feed(&entries(2..3)))
        .expect(1)
        .create();

    let client =
        ArxivHttpClient::new(&format!("{}/api/query", server.url()), 2, Duration::ZERO).unwrap();
    let items = client.search(&query(3)).unwrap();

    first.assert();
    second.assert();
    let ids: Vec<&str> = items.iter().map(|item| item.id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            "http://arxiv.org/abs/2403.00000v1",
            "http://arxiv.org/abs/2403.00001v1",
            "http://arxiv.org/abs/2403.00002v1",
        ]
    );
    assert_eq!(items[1].authors, vec!["Author 1"]);
}

#[test]
fn short_page_stops_paging() {
    let mut server = Server::new();
    let first = server
        .mock("GET", "/api/query")
        .match_query(page_matcher(0, 2))
        .with_status(200)
        .with_body(feed(&entries(0..2)))
        .expect(1)
        .create();
    let second = server
        .mock("GET", "/api/query")
        .match_query(page_matcher(2, 2))
        .with_status(200)
        .with_body(feed(&entries(2..3)))
        .expect(1)
        .create();

    let client =
        ArxivHttpClient::new(&format!("{}/api/query", server.url()), 2, Duration::ZERO).unwrap();
    let items = client.search(&query(10)).unwrap();

    first.assert();
    second.assert();
    assert_eq!(items.len(), 3);
}

#[test]
fn server_error_is_a_status_error() {
    let mut server = Server::new();
    let _mock = server
        .mock("GET", "/api/query")
        .match_query(Matcher::Any)
        .with_status(500)
        .with_body("internal error")
        .create();

    let client =
        ArxivHttpClient::new(&format!("{}/api/query", server.url()), 50, Duration::ZERO).unwrap();
    let err = client.search(&query(5)).unwrap_err();

    assert_matches!(err, HarvestError::ArxivStatus { status: 500, .. });
}

#[test]
fn collect_then_fetch_end_to_end() {
    let mut server = Server::new();
    let pdfs: Vec<(usize, String)> = (0..2)
        .map(|n| (n, format!("{}/pdf/{n}", server.url())))
        .collect();
    let search = server
        .mock("GET", "/api/query")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(feed(&pdfs))
        .expect(1)
        .create();
    let pdf0 = server
        .mock("GET", "/pdf/0")
        .with_status(200)
        .with_body("%PDF-0")
        .expect(1)
        .create();
    let pdf1 = server
        .mock("GET", "/pdf/1")
        .with_status(200)
        .with_body("%PDF-1")
        .expect(1)
        .create();

    let temp = tempfile::tempdir().unwrap();
    let config = ResolvedConfig {
        query: "cat:cs.AI".to_string(),
        max_results: 5,
        page_delay_ms: 0,
        workers: 4,
        base_dir: Utf8PathBuf::from_path_buf(temp.path().join("arxiv_data")).unwrap(),
        api_url: format!("{}/api/query", server.url()),
        ..ResolvedConfig::default()
    };
    let search_client = ArxivHttpClient::from_config(&config).unwrap();
    let documents = HttpDocumentClient::from_config(&config).unwrap();
    let app = App::new(config, search_client, documents);

    let result = app.run(&JsonOutput).unwrap();

    search.assert();
    pdf0.assert();
    pdf1.assert();
    assert_eq!(result.records, 2);
    let downloads = result.downloads.unwrap();
    assert_eq!(downloads.downloaded, 2);
    assert!(downloads.errors.is_empty());

    let pdf_dir = temp.path().join("arxiv_data").join("pdfs");
    assert_eq!(std::fs::read(pdf_dir.join("paper_0000.pdf")).unwrap(), b"%PDF-0");
    assert_eq!(std::fs::read(pdf_dir.join("paper_0001.pdf")).unwrap(), b"%PDF-1");

    // A fetch-only pass reads the metadata back and finds nothing to do.
    let again = app.fetch(&JsonOutput).unwrap();
    assert_eq!(again.records, 2);
    assert_eq!(again.downloads.unwrap().skipped, 2);
    pdf0.assert();
    pdf1.assert();
}
