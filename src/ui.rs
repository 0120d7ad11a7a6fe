use crate::app::{App, BrowseView};
use crate::model::format_duration;
use crate::player::{Player, PlayerState};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};

const APP_TITLE: &str = "resound";

struct Palette {
    panel_bg: Color,
    border: Color,
    text: Color,
    muted: Color,
    accent: Color,
    selected_bg: Color,
}

fn palette() -> Palette {
    Palette {
        panel_bg: Color::Rgb(19, 29, 43),
        border: Color::Rgb(69, 121, 176),
        text: Color::Rgb(214, 228, 248),
        muted: Color::Rgb(149, 173, 204),
        accent: Color::Rgb(100, 203, 184),
        selected_bg: Color::Rgb(34, 55, 82),
    }
}

fn split(area: Rect) -> std::rc::Rc<[Rect]> {
    Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(4),
            Constraint::Length(3),
        ])
        .split(area)
}

pub fn draw(
    frame: &mut Frame,
    app: &App,
    player: &Player,
    command_buffer: &str,
    command_mode: bool,
) {
    let palette = palette();
    let sections = split(frame.area());

    draw_header(frame, sections[0], app, &palette);
    draw_list(frame, sections[1], app, player, &palette);
    draw_transport(frame, sections[2], app, player, &palette);
    draw_command_bar(frame, sections[3], command_buffer, command_mode, &palette);
}

fn draw_header(frame: &mut Frame, area: Rect, app: &App, palette: &Palette) {
    let mut spans = vec![
        Span::styled(
            APP_TITLE,
            Style::default().fg(palette.accent).add_modifier(Modifier::BOLD),
        ),
        Span::raw("   "),
    ];
    for view in [
        BrowseView::Songs,
        BrowseView::Albums,
        BrowseView::Artists,
        BrowseView::Playlists,
    ] {
        let style = if view == app.view {
            Style::default()
                .fg(palette.text)
                .bg(palette.selected_bg)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(palette.muted)
        };
        spans.push(Span::styled(format!(" {} ", view.label()), style));
        spans.push(Span::raw(" "));
    }

    let header = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(palette.border))
            .style(Style::default().bg(palette.panel_bg)),
    );
    frame.render_widget(header, area);
}

fn draw_list(frame: &mut Frame, area: Rect, app: &App, player: &Player, palette: &Palette) {
    let current_id = player.current_track().map(|track| track.id);
    let items: Vec<ListItem> = app
        .visible_rows(player)
        .into_iter()
        .map(|row| {
            let style = if row.track_id.is_some() && row.track_id == current_id {
                Style::default().fg(palette.accent)
            } else {
                Style::default().fg(palette.text)
            };
            ListItem::new(Line::from(Span::styled(row.label, style)))
        })
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(palette.border))
                .style(Style::default().bg(palette.panel_bg)),
        )
        .highlight_style(Style::default().bg(palette.selected_bg));

    let mut state = ListState::default().with_selected(Some(app.selected));
    frame.render_stateful_widget(list, area, &mut state);
}

fn draw_transport(frame: &mut Frame, area: Rect, app: &App, player: &Player, palette: &Palette) {
    let state_label = match player.state() {
        PlayerState::Playing => "\u{25b6} Playing",
        PlayerState::Paused => "\u{23f8} Paused",
        PlayerState::Stopped => "\u{25a0} Stopped",
    };

    let now_playing = match player.current_track() {
        Some(track) => {
            let position = player
                .playhead()
                .map(format_duration)
                .unwrap_or_else(|| String::from("-:--"));
            format!(
                "{} - {}  [{} / {}]",
                track.title,
                track.artist.as_deref().unwrap_or("Unknown artist"),
                position,
                track.formatted_duration(),
            )
        }
        None => String::from("Nothing queued"),
    };

    let (shuffle, repeat) = player
        .playlist()
        .map(|playlist| (playlist.is_shuffle(), playlist.is_repeat()))
        .unwrap_or((false, false));
    let flags = format!(
        "{}{}  vol {:>3}%",
        if shuffle { "[shuffle] " } else { "" },
        if repeat { "[repeat]" } else { "" },
        (player.volume() * 100.0).round() as u16,
    );

    let lines = vec![
        Line::from(vec![
            Span::styled(state_label, Style::default().fg(palette.accent)),
            Span::raw("  "),
            Span::styled(now_playing, Style::default().fg(palette.text)),
            Span::raw("  "),
            Span::styled(flags, Style::default().fg(palette.muted)),
        ]),
        Line::from(Span::styled(
            app.status.clone(),
            Style::default().fg(palette.muted),
        )),
    ];

    let transport = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(palette.border))
            .style(Style::default().bg(palette.panel_bg)),
    );
    frame.render_widget(transport, area);
}

fn draw_command_bar(
    frame: &mut Frame,
    area: Rect,
    command_buffer: &str,
    command_mode: bool,
    palette: &Palette,
) {
    let content = if command_mode {
        format!(":{command_buffer}")
    } else {
        String::from(
            "enter play  space pause  n/b next/prev  s shuffle  r repeat  tab view  : command  q quit",
        )
    };
    let bar = Paragraph::new(Line::from(Span::styled(
        content,
        Style::default().fg(palette.muted),
    )))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(palette.border))
            .style(Style::default().bg(palette.panel_bg)),
    );
    frame.render_widget(bar, area);
}
