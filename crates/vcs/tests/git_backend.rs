#![cfg(feature = "git")]


use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use vcs::{
    GitBackend, LogQuery, Revision, VcsBackend, VcsBackendType, VcsBranches, VcsConfig,
    VcsErrorKind, VcsFactory, VcsHistory, VcsWorkingCopy,
};
use vcs_test_utils::{is_git_available, GitRemote, ANOTHER, FOO_BAR};

macro_rules! require_git {
    () => {
        if !is_git_available() {
            eprintln!("Skipping test: git not available");
            return;
        }
    };
}

async fn cloned(remote: &GitRemote) -> GitBackend {
    let vcs = GitBackend::new(remote.url(), &remote.clone_path);
    vcs.clone_repo().await.expect("clone");
    vcs.update().await.expect("update");
    vcs
}

async fn log(vcs: &impl VcsHistory, query: LogQuery) -> Vec<Revision> {
    vcs.log(query)
        .await
        .expect("log")
        .try_collect_vec()
        .await
        .expect("collect log")
}

fn subjects(revisions: &[Revision]) -> Vec<&str> {
    revisions.iter().map(Revision::subject).collect()
}

#[tokio::test]
async fn test_get_default_revision() {
    require_git!();
    let remote = GitRemote::init();
    let vcs = GitBackend::new(remote.url(), &remote.clone_path);
    assert_eq!(vcs.get_default_revision().await.unwrap(), "master");

    vcs.clone_repo().await.unwrap();
    assert_eq!(vcs.get_default_revision().await.unwrap(), "master");
}

#[tokio::test]
async fn test_simple() {
    require_git!();
    let remote = GitRemote::init();
    let vcs = cloned(&remote).await;

    let head = log(&vcs, LogQuery::new().parent("HEAD").limit(1)).await;
    assert_eq!(head.len(), 1);
    assert_eq!(head[0].id().as_str().len(), 40);
    assert_eq!(head[0].author(), "Foo Bar <foo@example.com>");
    assert_eq!(head[0].message(), "biz\nbaz\n");
    assert_eq!(head[0].subject(), "biz");

    let revisions = log(&vcs, LogQuery::new()).await;
    assert_eq!(revisions.len(), 2);
    let (biz, test) = (&revisions[0], &revisions[1]);

    assert_eq!(biz.subject(), "biz");
    assert_eq!(biz.message(), "biz\nbaz\n");
    assert_eq!(biz.author(), "Foo Bar <foo@example.com>");
    assert_eq!(biz.committer(), "Foo Bar <foo@example.com>");
    assert_eq!(biz.parents(), &[test.id().clone()]);
    assert_eq!(biz.author_date(), biz.committer_date());
    assert_eq!(biz.branches(), &["master"]);

    assert_eq!(test.subject(), "test");
    assert_eq!(test.message(), "test\nlol\n");
    assert!(test.parents().is_empty());
    assert_eq!(test.author_date(), test.committer_date());
    assert_eq!(test.branches(), &["master"]);
    assert!(test.author_date() < biz.author_date());

    let diff = vcs.export(biz.id().as_str()).await.unwrap();
    assert_eq!(
        diff,
        "diff --git a/BAR b/BAR\nnew file mode 100644\nindex 0000000..e69de29\n"
    );

    let first = log(&vcs, LogQuery::new().offset(0).limit(1)).await;
    assert_eq!(subjects(&first), ["biz"]);
    let second = log(&vcs, LogQuery::new().offset(1).limit(1)).await;
    assert_eq!(subjects(&second), ["test"]);
    let past_end = log(&vcs, LogQuery::new().offset(2)).await;
    assert!(past_end.is_empty());
    let none = log(&vcs, LogQuery::new().limit(0)).await;
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_export_root_revision() {
    require_git!();
    let remote = GitRemote::init();
    let vcs = cloned(&remote).await;

    let revisions = log(&vcs, LogQuery::new()).await;
    let diff = vcs.export(revisions[1].id().as_str()).await.unwrap();
    assert_eq!(
        diff,
        "diff --git a/FOO b/FOO\nnew file mode 100644\nindex 0000000..e69de29\n"
    );

    let err = vcs.export("0123456789abcdef0123456789abcdef01234567").await.unwrap_err();
    assert_eq!(err.kind(), VcsErrorKind::InvalidQuery);
}

#[tokio::test]
async fn test_log_with_authors() {
    require_git!();
    let mut remote = GitRemote::init();
    remote.commit("master", "BAZ", "bazzy", ANOTHER);
    let vcs = cloned(&remote).await;

    assert_eq!(log(&vcs, LogQuery::new()).await.len(), 3);

    for needle in ["Another Committer", "ac@d.not.zm.exist"] {
        let revisions = log(&vcs, LogQuery::new().author(needle)).await;
        assert_eq!(revisions.len(), 1);
        assert_eq!(revisions[0].author(), "Another Committer <ac@d.not.zm.exist>");
        assert_eq!(revisions[0].subject(), "bazzy");
    }

    let default = vcs.get_default_revision().await.unwrap();
    let revisions = log(&vcs, LogQuery::new().branch(default).author("Foo")).await;
    assert_eq!(revisions.len(), 2);

    // case-sensitive
    assert!(log(&vcs, LogQuery::new().author("foo bar")).await.is_empty());

    // offset counts only revisions that passed the author filter
    let revisions = log(&vcs, LogQuery::new().author(FOO_BAR.1).offset(1)).await;
    assert_eq!(subjects(&revisions), ["test"]);
}

#[tokio::test]
async fn test_log_throws_errors_when_needed() {
    require_git!();
    let remote = GitRemote::init();
    let vcs = cloned(&remote).await;

    let err = vcs
        .log(LogQuery::new().parent("HEAD").branch("master"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), VcsErrorKind::InvalidQuery);

    let err = vcs.log(LogQuery::new().branch("nope")).await.unwrap_err();
    assert_eq!(err.kind(), VcsErrorKind::InvalidQuery);

    let err = vcs.log(LogQuery::new().parent("nope")).await.unwrap_err();
    assert_eq!(err.kind(), VcsErrorKind::InvalidQuery);

    let err = vcs.log(LogQuery::new().parent("--all")).await.unwrap_err();
    assert_eq!(err.kind(), VcsErrorKind::InvalidQuery);
}

#[tokio::test]
async fn test_log_with_branches() {
    require_git!();
    let mut remote = GitRemote::init();
    remote.branch("B2", "master");
    remote.commit("B2", "BAZ", "second branch commit", FOO_BAR);
    remote.branch("B3", "master");
    remote.commit("B3", "IPSUM", "3rd branch", FOO_BAR);
    let vcs = cloned(&remote).await;
    let default = vcs.get_default_revision().await.unwrap();

    let revisions = log(&vcs, LogQuery::new()).await;
    assert_eq!(
        subjects(&revisions),
        ["3rd branch", "second branch commit", "biz", "test"]
    );
    assert_eq!(revisions[0].branches(), &["B3"]);
    assert_eq!(revisions[1].branches(), &["B2"]);
    assert_eq!(revisions[3].branches(), &[default.as_str(), "B2", "B3"]);

    let revisions = log(&vcs, LogQuery::new().branch("B3")).await;
    assert_eq!(revisions.len(), 3);
    assert_eq!(revisions[0].subject(), "3rd branch");
    assert_eq!(revisions[0].branches(), &["B3"]);
    assert_eq!(revisions[2].message(), "test\nlol\n");
    assert_eq!(revisions[2].branches(), &[default.as_str(), "B2", "B3"]);

    let revisions = log(&vcs, LogQuery::new().branch(default.as_str())).await;
    assert_eq!(subjects(&revisions), ["biz", "test"]);
}

#[tokio::test]
async fn test_branch_diverging_before_default_tip() {
    require_git!();
    let mut remote = GitRemote::init();
    remote.branch("B2", "master");
    remote.commit("B2", "BAZ", "C", FOO_BAR);
    remote.branch_at("B3", remote.root_commit());
    remote.commit("B3", "IPSUM", "D", FOO_BAR);
    let vcs = cloned(&remote).await;

    let revisions = log(&vcs, LogQuery::new().branch("B3")).await;
    assert_eq!(subjects(&revisions), ["D", "test"]);
    assert_eq!(revisions[1].branches(), &["master", "B2", "B3"]);

    let revisions = log(&vcs, LogQuery::new()).await;
    assert_eq!(subjects(&revisions), ["D", "C", "biz", "test"]);
    assert_eq!(revisions[0].branches(), &["B3"]);
    assert_eq!(revisions[1].branches(), &["B2"]);
    assert_eq!(revisions[2].branches(), &["master", "B2"]);
}

#[tokio::test]
async fn test_update_of_unchanged_remote_is_stable() {
    require_git!();
    let remote = GitRemote::init();
    let vcs = cloned(&remote).await;

    let branches = vcs.get_known_branches().await.unwrap();
    let ids: Vec<_> = log(&vcs, LogQuery::new()).await.iter().map(|r| r.id().clone()).collect();
    for id in &ids {
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    vcs.update().await.unwrap();
    assert_eq!(vcs.get_known_branches().await.unwrap(), branches);
    let again: Vec<_> = log(&vcs, LogQuery::new()).await.iter().map(|r| r.id().clone()).collect();
    assert_eq!(again, ids);
}

#[tokio::test]
async fn test_is_child_parent() {
    require_git!();
    let mut remote = GitRemote::init();
    remote.branch("side", "master");
    remote.commit("side", "SIDE", "side", FOO_BAR);
    remote.commit("master", "MAIN", "main", FOO_BAR);
    let vcs = cloned(&remote).await;

    let revisions = log(&vcs, LogQuery::new()).await;
    let id = |subject: &str| {
        revisions
            .iter()
            .find(|r| r.subject() == subject)
            .map(|r| r.id().to_string())
            .expect("revision present")
    };
    let (test, biz, side, main) = (id("test"), id("biz"), id("side"), id("main"));

    assert!(vcs.is_child_parent(&biz, &test).await.unwrap());
    assert!(vcs.is_child_parent(&main, &test).await.unwrap());
    assert!(!vcs.is_child_parent(&test, &biz).await.unwrap());
    assert!(!vcs.is_child_parent(&biz, &biz).await.unwrap());
    assert!(!vcs.is_child_parent(&side, &main).await.unwrap());
    assert!(!vcs.is_child_parent(&main, &side).await.unwrap());

    // refs that name nothing are never related
    assert!(!vcs.is_child_parent(&biz, "nope").await.unwrap());
    assert!(!vcs.is_child_parent("nope", &test).await.unwrap());
    let missing = "0123456789abcdef0123456789abcdef01234567";
    assert!(!vcs.is_child_parent(missing, &test).await.unwrap());

    let err = vcs.is_child_parent(&biz, "--all").await.unwrap_err();
    assert_eq!(err.kind(), VcsErrorKind::InvalidQuery);
    let err = vcs.is_child_parent("", &test).await.unwrap_err();
    assert_eq!(err.kind(), VcsErrorKind::InvalidQuery);
}

#[tokio::test]
async fn test_get_known_branches() {
    require_git!();
    let remote = GitRemote::init();
    let vcs = cloned(&remote).await;

    let branches = vcs.get_known_branches().await.unwrap();
    assert_eq!(branches.len(), 1);
    assert!(branches.contains("master"));

    remote.branch("test_branch", "master");
    vcs.update().await.unwrap();
    let branches = vcs.get_known_branches().await.unwrap();
    assert_eq!(branches.len(), 2);
    assert!(branches.contains("test_branch"));
}

#[tokio::test]
async fn test_update_picks_up_new_history() {
    require_git!();
    let mut remote = GitRemote::init();
    let vcs = cloned(&remote).await;

    vcs.update().await.unwrap();
    assert_eq!(log(&vcs, LogQuery::new()).await.len(), 2);

    remote.commit("master", "NEW", "new work", FOO_BAR);
    vcs.update().await.unwrap();
    let revisions = log(&vcs, LogQuery::new()).await;
    assert_eq!(subjects(&revisions), ["new work", "biz", "test"]);
}

#[tokio::test]
async fn test_clone_lifecycle() {
    require_git!();
    let remote = GitRemote::init();
    let vcs = GitBackend::new(remote.url(), &remote.clone_path);

    assert!(!vcs.is_cloned().await);
    vcs.clone_repo().await.unwrap();
    assert!(vcs.is_cloned().await);
    // already present
    vcs.clone_repo().await.unwrap();

    let occupied = remote.root.path().join("occupied");
    std::fs::create_dir_all(&occupied).unwrap();
    std::fs::write(occupied.join("README"), "hi").unwrap();
    let err = GitBackend::new(remote.url(), &occupied)
        .clone_repo()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), VcsErrorKind::RepositoryUnavailable);

    let missing = format!("file://{}", remote.root.path().join("missing").display());
    let err = GitBackend::new(missing, remote.root.path().join("wc2"))
        .clone_repo()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), VcsErrorKind::RepositoryUnavailable);
}

#[tokio::test]
async fn test_dropped_stream_releases_working_copy() {
    require_git!();
    let mut remote = GitRemote::init();
    for i in 0..20 {
        remote.commit("master", &format!("F{i}"), &format!("commit {i}"), FOO_BAR);
    }
    let vcs = cloned(&remote).await;

    let mut stream = vcs.log(LogQuery::new()).await.unwrap();
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.subject(), "commit 19");
    drop(stream);

    tokio::time::timeout(Duration::from_secs(30), vcs.update())
        .await
        .expect("update blocked by a dropped log stream")
        .unwrap();
}

#[tokio::test]
async fn test_concurrent_queries_and_updates() {
    require_git!();
    let remote = GitRemote::init();
    let vcs: Arc<dyn VcsBackend> = Arc::new(cloned(&remote).await);

    let mut tasks = Vec::new();
    for i in 0..8 {
        let vcs = vcs.clone();
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                vcs.update().await.map(|_| 0)
            } else {
                match vcs.log(LogQuery::new()).await {
                    Ok(stream) => stream.try_collect_vec().await.map(|r| r.len()),
                    Err(e) => Err(e),
                }
            }
        }));
    }
    for (i, task) in tasks.into_iter().enumerate() {
        let result = task.await.unwrap().unwrap();
        if i % 2 == 1 {
            assert_eq!(result, 2);
        }
    }
}

#[tokio::test]
async fn test_factory_creates_git_backend() {
    require_git!();
    let remote = GitRemote::init();
    let config = VcsConfig::new(VcsBackendType::Git, remote.url(), &remote.clone_path)
        .with_timeout(Duration::from_secs(60));
    let vcs = VcsFactory::create(&config).unwrap();
    vcs.clone_repo().await.unwrap();

    assert_eq!(VcsFactory::detect(&remote.clone_path).unwrap(), VcsBackendType::Git);
    let detected = VcsFactory::auto_detect(&remote.url(), &remote.clone_path).unwrap();
    assert_eq!(detected.backend_type(), VcsBackendType::Git);
    assert_eq!(
        detected.log(LogQuery::new()).await.unwrap().try_collect_vec().await.unwrap().len(),
        2
    );
}
